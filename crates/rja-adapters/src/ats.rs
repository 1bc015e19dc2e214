use std::future::Future;

use async_trait::async_trait;
use rja_core::{AtsProvider, RawPosting, SourceConfig, SourceKind};
use rja_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::{debug, info_span, Instrument};
use url::Url;

use crate::{
    get_body, json_at, json_money, json_str_at, FetchError, FetchedBatch, ParsedEntries,
    SourceAdapter,
};

/// Paginated ATS board APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtsApiAdapter;

fn page_url(
    source: &SourceConfig,
    pairs: &[(&str, String)],
) -> Result<String, FetchError> {
    let mut url = Url::parse(&source.endpoint).map_err(|e| FetchError::decode(&source.name, e))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

fn decode_page(source: &SourceConfig, body: &[u8]) -> Result<JsonValue, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::decode(&source.name, e))
}

fn entries<'a>(value: &'a JsonValue, key: Option<&str>) -> Option<&'a Vec<JsonValue>> {
    match key {
        Some(key) => value.get(key)?.as_array(),
        None => value.as_array(),
    }
}

fn non_empty(values: impl IntoIterator<Item = Option<String>>, sep: &str) -> Option<String> {
    let parts: Vec<String> = values.into_iter().flatten().collect();
    (!parts.is_empty()).then(|| parts.join(sep))
}

/// `{jobs: [...]}` from the Greenhouse board API (`?content=true`).
pub fn parse_greenhouse_page(value: &JsonValue, company: Option<&str>) -> Option<ParsedEntries> {
    let jobs = entries(value, Some("jobs"))?;
    let mut parsed = ParsedEntries::default();
    for job in jobs {
        parsed.push_entry(greenhouse_posting(job, company));
    }
    Some(parsed)
}

fn greenhouse_posting(job: &JsonValue, company: Option<&str>) -> Option<RawPosting> {
    if !job.is_object() {
        return None;
    }
    let offices = json_at(job, &["offices"])
        .and_then(JsonValue::as_array)
        .map(|offices| offices.iter().map(|o| json_str_at(o, &["name"])));
    let location = json_str_at(job, &["location", "name"])
        .or_else(|| offices.and_then(|names| non_empty(names, ", ")));
    Some(RawPosting {
        source_job_id: json_str_at(job, &["id"]),
        title: json_str_at(job, &["title"]),
        company: json_str_at(job, &["company_name"]).or_else(|| company.map(str::to_string)),
        description: json_str_at(job, &["content"]).or_else(|| json_str_at(job, &["description"])),
        apply_url: json_str_at(job, &["absolute_url"]),
        location,
        ..RawPosting::default()
    })
}

/// A bare array page from the Lever postings API (`?mode=json`).
pub fn parse_lever_page(value: &JsonValue, company: Option<&str>) -> Option<ParsedEntries> {
    let postings = entries(value, None)?;
    let mut parsed = ParsedEntries::default();
    for posting in postings {
        parsed.push_entry(lever_posting(posting, company));
    }
    Some(parsed)
}

fn lever_posting(posting: &JsonValue, company: Option<&str>) -> Option<RawPosting> {
    if !posting.is_object() {
        return None;
    }
    let remote = json_str_at(posting, &["workplaceType"]).map(|w| w.eq_ignore_ascii_case("remote"));
    Some(RawPosting {
        source_job_id: json_str_at(posting, &["id"]),
        title: json_str_at(posting, &["text"]),
        company: company.map(str::to_string),
        description: json_str_at(posting, &["descriptionPlain"])
            .or_else(|| json_str_at(posting, &["description"])),
        apply_url: json_str_at(posting, &["applyUrl"])
            .or_else(|| json_str_at(posting, &["hostedUrl"])),
        location: json_str_at(posting, &["categories", "location"]),
        remote: remote.filter(|r| *r),
        salary_min: json_at(posting, &["salaryRange", "min"]).and_then(json_money),
        salary_max: json_at(posting, &["salaryRange", "max"]).and_then(json_money),
        ..RawPosting::default()
    })
}

/// SmartRecruiters page: postings plus the `totalFound` count used to stop paging.
pub fn parse_smartrecruiters_page(
    value: &JsonValue,
    company: Option<&str>,
) -> Option<(ParsedEntries, Option<u64>)> {
    let content = entries(value, Some("content"))?;
    let total = value.get("totalFound").and_then(JsonValue::as_u64);
    let mut parsed = ParsedEntries::default();
    for posting in content {
        parsed.push_entry(smartrecruiters_posting(posting, company));
    }
    Some((parsed, total))
}

fn smartrecruiters_posting(posting: &JsonValue, company: Option<&str>) -> Option<RawPosting> {
    if !posting.is_object() {
        return None;
    }
    let id = json_str_at(posting, &["id"]);
    let public_url = match (json_str_at(posting, &["company", "identifier"]), &id) {
        (Some(slug), Some(id)) => Some(format!("https://jobs.smartrecruiters.com/{slug}/{id}")),
        _ => None,
    };
    let location = json_str_at(posting, &["location", "fullLocation"]).or_else(|| {
        non_empty(
            [
                json_str_at(posting, &["location", "city"]),
                json_str_at(posting, &["location", "country"]),
            ],
            ", ",
        )
    });
    let remote = json_at(posting, &["location", "remote"]).and_then(JsonValue::as_bool);
    Some(RawPosting {
        source_job_id: id,
        title: json_str_at(posting, &["name"]),
        company: json_str_at(posting, &["company", "name"]).or_else(|| company.map(str::to_string)),
        description: json_str_at(posting, &["jobAd", "sections", "jobDescription", "text"]),
        apply_url: public_url.or_else(|| json_str_at(posting, &["ref"])),
        location,
        remote: remote.filter(|r| *r),
        ..RawPosting::default()
    })
}

impl AtsApiAdapter {
    async fn fetch_greenhouse(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError> {
        let url = page_url(source, &[("content", "true".to_string())])?;
        let value = decode_page(source, &get_body(http, source, &url).await?)?;
        let parsed = parse_greenhouse_page(&value, source.company.as_deref())
            .ok_or_else(|| FetchError::decode(&source.name, "expected an object with a `jobs` array"))?;
        let mut batch = FetchedBatch::default();
        batch.absorb(parsed);
        Ok(batch)
    }

    async fn fetch_lever(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError> {
        paginate_lever(source, |url| async move { get_body(http, source, &url).await }).await
    }

    async fn fetch_smartrecruiters(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError> {
        paginate_smartrecruiters(source, |url| async move { get_body(http, source, &url).await })
            .await
    }
}

/// `skip`/`limit` paging; a page shorter than `page_size` is the last one.
async fn paginate_lever<F, Fut>(source: &SourceConfig, mut get: F) -> Result<FetchedBatch, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, FetchError>>,
{
    let page_size = source.page_size.max(1);
    let mut batch = FetchedBatch::default();
    for page in 0..source.max_pages {
        let skip = u64::from(page) * u64::from(page_size);
        let url = page_url(
            source,
            &[
                ("mode", "json".to_string()),
                ("skip", skip.to_string()),
                ("limit", page_size.to_string()),
            ],
        )?;
        let value = decode_page(source, &get(url).await?)?;
        let parsed = parse_lever_page(&value, source.company.as_deref())
            .ok_or_else(|| FetchError::decode(&source.name, "expected a JSON array of postings"))?;
        let seen = parsed.postings.len() + parsed.malformed;
        batch.absorb(parsed);
        if seen < page_size as usize {
            return Ok(batch);
        }
    }
    debug!(max_pages = source.max_pages, "page limit reached");
    Ok(batch)
}

/// `offset`/`limit` paging until `totalFound` is covered or a page is empty.
async fn paginate_smartrecruiters<F, Fut>(
    source: &SourceConfig,
    mut get: F,
) -> Result<FetchedBatch, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, FetchError>>,
{
    let page_size = source.page_size.max(1);
    let mut batch = FetchedBatch::default();
    let mut offset: u64 = 0;
    for _ in 0..source.max_pages {
        let url = page_url(
            source,
            &[
                ("offset", offset.to_string()),
                ("limit", page_size.to_string()),
            ],
        )?;
        let value = decode_page(source, &get(url).await?)?;
        let (parsed, total) = parse_smartrecruiters_page(&value, source.company.as_deref())
            .ok_or_else(|| {
                FetchError::decode(&source.name, "expected an object with a `content` array")
            })?;
        let seen = (parsed.postings.len() + parsed.malformed) as u64;
        batch.absorb(parsed);
        offset += seen;
        if seen == 0 || total.is_some_and(|total| offset >= total) {
            return Ok(batch);
        }
    }
    debug!(max_pages = source.max_pages, "page limit reached");
    Ok(batch)
}

#[async_trait]
impl SourceAdapter for AtsApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::AtsApi
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<FetchedBatch, FetchError> {
        let provider = source.provider.ok_or_else(|| {
            FetchError::decode(&source.name, "ats_api source has no provider configured")
        })?;
        let span = info_span!("ats_fetch", source = %source.name, ?provider);
        async {
            let batch = match provider {
                AtsProvider::Greenhouse => self.fetch_greenhouse(http, source).await?,
                AtsProvider::Lever => self.fetch_lever(http, source).await?,
                AtsProvider::SmartRecruiters => self.fetch_smartrecruiters(http, source).await?,
            };
            debug!(
                postings = batch.postings.len(),
                malformed = batch.malformed,
                pages = batch.pages,
                "fetched"
            );
            Ok::<_, FetchError>(batch)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rja_core::FeedFormat;
    use serde_json::json;

    fn source(endpoint: &str) -> SourceConfig {
        SourceConfig {
            name: "acme-lever".to_string(),
            kind: SourceKind::AtsApi,
            endpoint: endpoint.to_string(),
            timeout_ms: 1_000,
            max_pages: 3,
            provider: Some(AtsProvider::Lever),
            company: Some("Acme".to_string()),
            format: FeedFormat::Json,
            page_size: 2,
            enabled: true,
        }
    }

    fn fixture_bytes(rel: &str) -> Vec<u8> {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(rel);
        std::fs::read(path).unwrap()
    }

    fn smartrecruiters_page(ids: &[&str], total: Option<u64>) -> Vec<u8> {
        let content: Vec<JsonValue> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "name": "Data Engineer",
                    "company": {"identifier": "acme", "name": "Acme"}
                })
            })
            .collect();
        let mut page = json!({"content": content});
        if let Some(total) = total {
            page["totalFound"] = json!(total);
        }
        serde_json::to_vec(&page).unwrap()
    }

    #[tokio::test]
    async fn lever_paging_stops_on_short_page() {
        let cfg = source("https://api.lever.co/v0/postings/northwind");
        let (full, short) = (fixture_bytes("lever/page1.json"), fixture_bytes("lever/page2.json"));
        let mut urls = Vec::new();
        let batch = paginate_lever(&cfg, |url| {
            let body = if url.contains("skip=0") { full.clone() } else { short.clone() };
            urls.push(url);
            async move { Ok::<_, FetchError>(body) }
        })
        .await
        .unwrap();

        assert_eq!(batch.pages, 2);
        assert_eq!(batch.postings.len(), 3);
        assert_eq!(
            urls,
            [
                "https://api.lever.co/v0/postings/northwind?mode=json&skip=0&limit=2",
                "https://api.lever.co/v0/postings/northwind?mode=json&skip=2&limit=2",
            ]
        );
    }

    #[tokio::test]
    async fn lever_paging_stops_at_max_pages() {
        let cfg = source("https://api.lever.co/v0/postings/northwind");
        let full = fixture_bytes("lever/page1.json");
        let mut calls = 0;
        let batch = paginate_lever(&cfg, |_| {
            calls += 1;
            let body = full.clone();
            async move { Ok::<_, FetchError>(body) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(batch.pages, 3);
        assert_eq!(batch.postings.len(), 6);
    }

    #[tokio::test]
    async fn smartrecruiters_paging_stops_at_total_found() {
        let mut cfg = source("https://api.smartrecruiters.com/v1/companies/acme/postings");
        cfg.page_size = 1;
        let mut urls = Vec::new();
        let batch = paginate_smartrecruiters(&cfg, |url| {
            let body = if url.contains("offset=0") {
                smartrecruiters_page(&["1"], Some(2))
            } else {
                smartrecruiters_page(&["2"], Some(2))
            };
            urls.push(url);
            async move { Ok::<_, FetchError>(body) }
        })
        .await
        .unwrap();

        assert_eq!(batch.pages, 2);
        assert_eq!(batch.postings.len(), 2);
        assert!(urls[1].ends_with("?offset=1&limit=1"));
    }

    #[tokio::test]
    async fn smartrecruiters_paging_stops_on_empty_page_and_page_cap() {
        let mut cfg = source("https://api.smartrecruiters.com/v1/companies/acme/postings");
        cfg.page_size = 1;
        let batch = paginate_smartrecruiters(&cfg, |url| {
            let body = if url.contains("offset=0") {
                smartrecruiters_page(&["1"], None)
            } else {
                smartrecruiters_page(&[], None)
            };
            async move { Ok::<_, FetchError>(body) }
        })
        .await
        .unwrap();
        assert_eq!((batch.pages, batch.postings.len()), (2, 1));

        let mut calls = 0;
        let batch = paginate_smartrecruiters(&cfg, |_| {
            calls += 1;
            let body = smartrecruiters_page(&["x"], Some(100));
            async move { Ok::<_, FetchError>(body) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(batch.pages, 3);
    }

    #[tokio::test]
    async fn page_errors_stop_paging() {
        let cfg = source("https://api.lever.co/v0/postings/northwind");
        let err = paginate_lever(&cfg, |_| async { Ok::<_, FetchError>(b"{\"jobs\": []}".to_vec()) })
            .await
            .unwrap_err();
        assert!(matches!(err.cause, crate::FetchCause::Decode(_)));
    }

    #[test]
    fn page_url_appends_to_existing_query() {
        let cfg = source("https://api.lever.co/v0/postings/acme?team=eng");
        let url = page_url(&cfg, &[("skip", "2".to_string()), ("limit", "2".to_string())]).unwrap();
        assert_eq!(url, "https://api.lever.co/v0/postings/acme?team=eng&skip=2&limit=2");
    }

    #[test]
    fn lever_workplace_type_marks_remote_and_reads_salary() {
        let page = json!([
            {
                "id": "abc",
                "text": "Platform Engineer",
                "hostedUrl": "https://jobs.lever.co/acme/abc",
                "applyUrl": "https://jobs.lever.co/acme/abc/apply",
                "categories": {"location": "Berlin"},
                "workplaceType": "remote",
                "salaryRange": {"min": 90000, "max": 120000.0}
            },
            "not-an-object"
        ]);
        let parsed = parse_lever_page(&page, Some("Acme")).unwrap();
        assert_eq!(parsed.malformed, 1);
        let posting = &parsed.postings[0];
        assert_eq!(posting.apply_url.as_deref(), Some("https://jobs.lever.co/acme/abc/apply"));
        assert_eq!(posting.company.as_deref(), Some("Acme"));
        assert_eq!(posting.remote, Some(true));
        assert_eq!((posting.salary_min, posting.salary_max), (Some(90_000), Some(120_000)));
    }

    #[test]
    fn greenhouse_page_without_jobs_is_rejected() {
        assert!(parse_greenhouse_page(&json!({"meta": {"total": 0}}), None).is_none());
        assert!(parse_greenhouse_page(&json!({"jobs": []}), None)
            .unwrap()
            .postings
            .is_empty());
    }

    #[test]
    fn smartrecruiters_prefers_public_url() {
        let page = json!({
            "totalFound": 1,
            "content": [{
                "id": "744000",
                "name": "QA Engineer",
                "ref": "https://api.smartrecruiters.com/v1/companies/acme/postings/744000",
                "company": {"identifier": "acme", "name": "Acme Corp"},
                "location": {"city": "Lisbon", "country": "pt", "remote": false}
            }]
        });
        let (parsed, total) = parse_smartrecruiters_page(&page, None).unwrap();
        assert_eq!(total, Some(1));
        let posting = &parsed.postings[0];
        assert_eq!(
            posting.apply_url.as_deref(),
            Some("https://jobs.smartrecruiters.com/acme/744000")
        );
        assert_eq!(posting.location.as_deref(), Some("Lisbon, pt"));
        assert_eq!(posting.remote, None);
    }
}
