use chrono::{DateTime, Utc};
use regex::Regex;
use rja_core::{identity_key, Domain, Job, RawPosting};
use scraper::{Html, Node};
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub const MAX_DESCRIPTION_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationReason {
    MissingField,
    InvalidUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason:?} ({field})")]
pub struct NormalizationError {
    pub reason: NormalizationReason,
    pub field: &'static str,
}

impl NormalizationError {
    fn missing(field: &'static str) -> Self {
        Self {
            reason: NormalizationReason::MissingField,
            field,
        }
    }

    fn invalid_url() -> Self {
        Self {
            reason: NormalizationReason::InvalidUrl,
            field: "apply_url",
        }
    }
}

/// Maps raw postings onto [`Job`]. Domain is left as `Other` for the classifier.
#[derive(Debug, Clone)]
pub struct Normalizer {
    remote: Regex,
    salary_patterns: Vec<(Regex, u32)>,
}

impl Normalizer {
    pub fn new() -> Result<Self, regex::Error> {
        let range = r"\s*(?:-|–|—|to)\s*";
        Ok(Self {
            remote: Regex::new(r"(?i)\b(?:remote|anywhere|worldwide)\b")?,
            salary_patterns: vec![
                // $120,000 - $150,000
                (
                    Regex::new(&format!(
                        r"\$\s?(\d{{1,3}}(?:,\d{{3}})+){range}\$?\s?(\d{{1,3}}(?:,\d{{3}})+)"
                    ))?,
                    1,
                ),
                // $120k - $150k, 120k-150k
                (
                    Regex::new(&format!(
                        r"(?i)(?:\$\s?|\b)(\d{{2,3}})\s?k?{range}\$?\s?(\d{{2,3}})\s?k\b"
                    ))?,
                    1000,
                ),
                // $90000 - $120000
                (
                    Regex::new(&format!(r"\$\s?(\d{{4,7}}){range}\$?\s?(\d{{4,7}})\b"))?,
                    1,
                ),
            ],
        })
    }

    pub fn normalize(
        &self,
        raw: &RawPosting,
        source: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<Job, NormalizationError> {
        let title = required(raw.title.as_deref(), "title")?;
        let company = required(raw.company.as_deref(), "company")?;
        let apply_url = required(raw.apply_url.as_deref(), "apply_url")?;
        let apply_url = canonical_apply_url(&apply_url)?;

        let source_job_id = trimmed(raw.source_job_id.as_deref());
        let id = identity_key(source, source_job_id.as_deref(), &apply_url);

        let description = raw
            .description
            .as_deref()
            .map(html_to_text)
            .map(|text| truncate_chars(&text, MAX_DESCRIPTION_CHARS))
            .unwrap_or_default();
        let location = trimmed(raw.location.as_deref());
        let remote = raw.remote == Some(true)
            || location.as_deref().is_some_and(|l| self.remote.is_match(l));

        let (salary_min, salary_max) = if raw.salary_min.is_some() || raw.salary_max.is_some() {
            checked_range(raw.salary_min, raw.salary_max)
        } else {
            raw.salary_text
                .as_deref()
                .and_then(|text| self.salary_from_text(text))
                .or_else(|| self.salary_from_text(&description))
                .map(|(min, max)| checked_range(Some(min), Some(max)))
                .unwrap_or((None, None))
        };

        Ok(Job {
            id,
            title,
            company,
            description,
            apply_url: apply_url.to_string(),
            location,
            remote,
            salary_min,
            salary_max,
            domain: Domain::Other,
            source: source.to_string(),
            source_job_id,
            created_at: observed_at,
            updated_at: observed_at,
        })
    }

    /// First salary range found in free text, in whole currency units.
    pub fn salary_from_text(&self, text: &str) -> Option<(i64, i64)> {
        self.salary_patterns.iter().find_map(|(pattern, scale)| {
            let caps = pattern.captures(text)?;
            let parse = |i: usize| -> Option<i64> {
                let digits = caps.get(i)?.as_str().replace(',', "");
                digits.parse::<i64>().ok().map(|v| v * i64::from(*scale))
            };
            Some((parse(1)?, parse(2)?))
        })
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, NormalizationError> {
    trimmed(value).ok_or_else(|| NormalizationError::missing(field))
}

fn canonical_apply_url(input: &str) -> Result<Url, NormalizationError> {
    let mut url = Url::parse(input).map_err(|_| NormalizationError::invalid_url())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return Err(NormalizationError::invalid_url());
    }
    url.set_fragment(None);
    Ok(url)
}

/// Negative or out-of-range values drop out; an inverted pair clears both.
fn checked_range(min: Option<i64>, max: Option<i64>) -> (Option<u32>, Option<u32>) {
    let min = min.and_then(|v| u32::try_from(v).ok());
    let max = max.and_then(|v| u32::try_from(v).ok());
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => (None, None),
        pair => pair,
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "table", "section", "article", "blockquote", "pre", "hr", "dd", "dt",
];

/// Text nodes joined as-is; block elements start on a word boundary.
fn fragment_text(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => out.push(' '),
            _ => {}
        }
    }
    out
}

/// Reduces markup (including entity-escaped markup, as served by Greenhouse)
/// to collapsed plain text.
pub fn html_to_text(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return collapse_whitespace(input);
    }
    let mut text = fragment_text(input);
    if input.contains("&lt;") && text.contains('<') {
        text = fragment_text(&text);
    }
    collapse_whitespace(&text)
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].trim_end().to_string(),
        None => input.to_string(),
    }
}
