//! Source adapter contract + ATS API and generic feed adapters.

use std::time::Duration;

use async_trait::async_trait;
use rja_core::{RawPosting, SourceConfig, SourceKind};
use rja_storage::{HttpError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod ats;
mod feed;

pub use ats::{parse_greenhouse_page, parse_lever_page, parse_smartrecruiters_page, AtsApiAdapter};
pub use feed::{parse_json_feed, parse_rss_feed, GenericFeedAdapter};

pub const CRATE_NAME: &str = "rja-adapters";

/// Postings parsed from one page or one feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEntries {
    pub postings: Vec<RawPosting>,
    /// Entries that could not be read as a posting at all.
    pub malformed: usize,
}

impl ParsedEntries {
    fn push_entry(&mut self, entry: Option<RawPosting>) {
        match entry {
            Some(posting) => self.postings.push(posting),
            None => self.malformed += 1,
        }
    }
}

/// Result of one complete `fetch` call for a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedBatch {
    pub postings: Vec<RawPosting>,
    pub malformed: usize,
    pub pages: u32,
}

impl FetchedBatch {
    pub fn from_postings(postings: Vec<RawPosting>) -> Self {
        Self {
            postings,
            malformed: 0,
            pages: 1,
        }
    }

    fn absorb(&mut self, parsed: ParsedEntries) {
        self.postings.extend(parsed.postings);
        self.malformed += parsed.malformed;
        self.pages += 1;
    }
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("cancelled before completion")]
    Cancelled,
}

#[derive(Debug, Error)]
#[error("source {source_name}: {cause}")]
pub struct FetchError {
    pub source_name: String,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(source_name: impl Into<String>, cause: impl Into<FetchCause>) -> Self {
        Self {
            source_name: source_name.into(),
            cause: cause.into(),
        }
    }

    pub fn decode(source_name: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(source_name, FetchCause::Decode(detail.to_string()))
    }
}

/// One provider family. `fetch` re-reads the source from scratch on every
/// call and keeps no state between calls.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError>;
}

pub fn adapter_for_kind(kind: SourceKind) -> Box<dyn SourceAdapter> {
    match kind {
        SourceKind::AtsApi => Box::new(AtsApiAdapter),
        SourceKind::GenericFeed => Box::new(GenericFeedAdapter),
    }
}

pub(crate) async fn get_body(
    http: &HttpFetcher,
    source: &SourceConfig,
    url: &str,
) -> Result<Vec<u8>, FetchError> {
    http.fetch_bytes(&source.name, url, Some(source.timeout()))
        .await
        .map(|resp| resp.body)
        .map_err(|err| FetchError::new(source.name.clone(), err))
}

pub(crate) fn json_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub(crate) fn json_str_at(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_at(value, path).and_then(json_text)
}

pub(crate) fn json_money(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().replace(',', "").parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}
