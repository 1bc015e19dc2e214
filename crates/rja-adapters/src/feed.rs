use async_trait::async_trait;
use quick_xml::events::Event;
use rja_core::{FeedFormat, RawPosting, SourceConfig, SourceKind};
use rja_storage::HttpFetcher;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info_span, warn, Instrument};

use crate::{get_body, json_money, json_text, FetchError, FetchedBatch, ParsedEntries, SourceAdapter};

const ARRAY_KEYS: [&str; 4] = ["jobs", "data", "results", "items"];
const TITLE_KEYS: [&str; 3] = ["title", "position", "job_title"];
const COMPANY_KEYS: [&str; 3] = ["company", "company_name", "author"];
const DESCRIPTION_KEYS: [&str; 3] = ["description", "summary", "job_description"];
const URL_KEYS: [&str; 4] = ["apply_url", "url", "link", "job_url"];
const LOCATION_KEYS: [&str; 3] = ["location", "job_location", "candidate_required_location"];
const ID_KEYS: [&str; 3] = ["id", "slug", "guid"];

/// Single-document JSON or RSS feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFeedAdapter;

fn first_text(obj: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(json_text))
}

fn json_flag(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_entry(entry: &JsonValue) -> Option<RawPosting> {
    let obj = entry.as_object()?;
    let title = first_text(obj, &TITLE_KEYS);
    let apply_url = first_text(obj, &URL_KEYS);
    // Board metadata rows (legal notices, paging info) carry neither.
    if title.is_none() && apply_url.is_none() {
        return None;
    }
    Some(RawPosting {
        source_job_id: first_text(obj, &ID_KEYS),
        title,
        company: first_text(obj, &COMPANY_KEYS),
        description: first_text(obj, &DESCRIPTION_KEYS),
        apply_url,
        location: first_text(obj, &LOCATION_KEYS),
        remote: obj.get("remote").and_then(json_flag),
        salary_min: obj.get("salary_min").and_then(json_money),
        salary_max: obj.get("salary_max").and_then(json_money),
        salary_text: obj.get("salary").and_then(json_text),
    })
}

/// Top-level array, or the first of `jobs`/`data`/`results`/`items` that holds one.
pub fn parse_json_feed(body: &[u8]) -> Result<ParsedEntries, String> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let list = match &value {
        JsonValue::Array(list) => list,
        JsonValue::Object(obj) => ARRAY_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(JsonValue::as_array))
            .ok_or_else(|| "no job array under jobs/data/results/items".to_string())?,
        _ => return Err("expected a JSON array or object".to_string()),
    };

    let mut parsed = ParsedEntries::default();
    for entry in list {
        parsed.push_entry(json_entry(entry));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemField {
    Title,
    Link,
    Description,
    Guid,
    Author,
    Location,
}

impl ItemField {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Self::Title),
            b"link" => Some(Self::Link),
            b"description" => Some(Self::Description),
            b"guid" => Some(Self::Guid),
            b"author" | b"creator" => Some(Self::Author),
            b"region" | b"location" => Some(Self::Location),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RssItem {
    title: String,
    link: String,
    description: String,
    guid: String,
    author: String,
    location: String,
}

impl RssItem {
    fn slot(&mut self, field: ItemField) -> &mut String {
        match field {
            ItemField::Title => &mut self.title,
            ItemField::Link => &mut self.link,
            ItemField::Description => &mut self.description,
            ItemField::Guid => &mut self.guid,
            ItemField::Author => &mut self.author,
            ItemField::Location => &mut self.location,
        }
    }

    fn into_posting(self) -> Option<RawPosting> {
        let text = |s: String| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        let mut title = text(self.title);
        let link = text(self.link);
        if title.is_none() && link.is_none() {
            return None;
        }
        let mut company = text(self.author);
        if company.is_none() {
            if let Some((role, employer)) = title.as_deref().and_then(|t| t.rsplit_once(" at ")) {
                let (role, employer) = (role.trim().to_string(), employer.trim().to_string());
                if !role.is_empty() && !employer.is_empty() {
                    title = Some(role);
                    company = Some(employer);
                }
            }
        }
        Some(RawPosting {
            source_job_id: text(self.guid),
            title,
            company,
            description: text(self.description),
            apply_url: link,
            location: text(self.location),
            ..RawPosting::default()
        })
    }
}

/// RSS 2.0 `<item>` elements. A document that breaks mid-way keeps the items
/// read so far; one that yields nothing at all is an error.
pub fn parse_rss_feed(body: &[u8]) -> Result<ParsedEntries, String> {
    let mut reader = quick_xml::Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedEntries::default();
    let mut item: Option<RssItem> = None;
    let mut field: Option<ItemField> = None;
    let mut saw_channel = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"rss" | b"channel" | b"feed" => saw_channel = true,
                    b"item" => {
                        item = Some(RssItem::default());
                        field = None;
                    }
                    other if item.is_some() => field = ItemField::from_local_name(other),
                    _ => {}
                }
            }
            Ok(Event::Text(te)) => {
                if let (Some(current), Some(f)) = (item.as_mut(), field) {
                    current.slot(f).push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::CData(cdata)) => {
                if let (Some(current), Some(f)) = (item.as_mut(), field) {
                    current.slot(f).push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"item" {
                    if let Some(done) = item.take() {
                        parsed.push_entry(done.into_posting());
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                if !saw_channel && parsed.postings.is_empty() && parsed.malformed == 0 {
                    return Err(err.to_string());
                }
                warn!(error = %err, "rss document truncated");
                if item.take().is_some() {
                    parsed.malformed += 1;
                }
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_channel {
        return Err("not an RSS document".to_string());
    }
    Ok(parsed)
}

#[async_trait]
impl SourceAdapter for GenericFeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::GenericFeed
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError> {
        let span = info_span!("feed_fetch", source = %source.name, format = ?source.format);
        async {
            let body = get_body(http, source, &source.endpoint).await?;
            let parsed = match source.format {
                FeedFormat::Json => parse_json_feed(&body),
                FeedFormat::Rss => parse_rss_feed(&body),
            }
            .map_err(|detail| FetchError::decode(&source.name, detail))?;
            if parsed.malformed > 0 {
                warn!(malformed = parsed.malformed, "skipped malformed feed entries");
            }
            let mut batch = FetchedBatch::default();
            batch.absorb(parsed);
            debug!(postings = batch.postings.len(), "fetched");
            Ok::<_, FetchError>(batch)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_feed_uses_first_known_array_key() {
        let body = br#"{"meta": {"count": 2}, "results": [
            {"position": "Data Engineer", "company_name": "Orbit", "job_url": "https://orbit.dev/jobs/9", "slug": "de-9"},
            42
        ]}"#;
        let parsed = parse_json_feed(body).unwrap();
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.postings.len(), 1);
        let posting = &parsed.postings[0];
        assert_eq!(posting.title.as_deref(), Some("Data Engineer"));
        assert_eq!(posting.company.as_deref(), Some("Orbit"));
        assert_eq!(posting.source_job_id.as_deref(), Some("de-9"));
    }

    #[test]
    fn json_feed_without_array_is_an_error() {
        assert!(parse_json_feed(br#"{"status": "ok"}"#).is_err());
        assert!(parse_json_feed(b"<html>").is_err());
    }

    #[test]
    fn json_metadata_rows_count_as_malformed() {
        let body = br#"[{"legal": "Terms apply"}, {"title": "SRE", "url": "https://x.io/1", "remote": "yes", "salary": "$100k - $130k"}]"#;
        let parsed = parse_json_feed(body).unwrap();
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.postings[0].remote, Some(true));
        assert_eq!(parsed.postings[0].salary_text.as_deref(), Some("$100k - $130k"));
    }

    #[test]
    fn rss_title_at_company_is_split_without_author() {
        let body = br#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>Board</title>
              <item>
                <title>Java Developer at Nordwind</title>
                <link>https://board.example/jobs/1</link>
                <description><![CDATA[<p>Spring Boot services</p>]]></description>
                <guid>job-1</guid>
              </item>
              <item><description>orphan</description></item>
            </channel></rss>"#;
        let parsed = parse_rss_feed(body).unwrap();
        assert_eq!(parsed.malformed, 1);
        let posting = &parsed.postings[0];
        assert_eq!(posting.title.as_deref(), Some("Java Developer"));
        assert_eq!(posting.company.as_deref(), Some("Nordwind"));
        assert_eq!(posting.description.as_deref(), Some("<p>Spring Boot services</p>"));
        assert_eq!(posting.source_job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn non_rss_document_is_an_error() {
        assert!(parse_rss_feed(br#"{"jobs": []}"#).is_err());
    }
}
