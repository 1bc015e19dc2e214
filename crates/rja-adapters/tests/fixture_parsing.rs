use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rja_adapters::{
    adapter_for_kind, parse_greenhouse_page, parse_json_feed, parse_lever_page, parse_rss_feed,
    parse_smartrecruiters_page, FetchCause,
};
use rja_core::{FeedFormat, SourceConfig, SourceKind};
use rja_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde_json::Value as JsonValue;

fn fixture(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(rel)
}

fn fixture_json(rel: &str) -> JsonValue {
    let text = fs::read_to_string(fixture(rel)).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn greenhouse_fixture_maps_ids_locations_and_company_fallback() {
    let parsed = parse_greenhouse_page(&fixture_json("greenhouse/jobs.json"), Some("Acme")).unwrap();
    assert_eq!(parsed.malformed, 0);
    assert_eq!(parsed.postings.len(), 3);

    let first = &parsed.postings[0];
    assert_eq!(first.source_job_id.as_deref(), Some("42"));
    assert_eq!(first.title.as_deref(), Some("Sr Backend Engineer"));
    assert_eq!(first.company.as_deref(), Some("Acme"));
    assert_eq!(first.location.as_deref(), Some("Remote - US"));
    assert!(first.description.as_deref().unwrap().contains("Kubernetes"));

    // Empty location name falls back to the office list.
    assert_eq!(parsed.postings[1].location.as_deref(), Some("New York, London"));
    // Blank title is left for the normalizer to reject.
    assert_eq!(parsed.postings[2].title, None);
}

#[test]
fn lever_fixture_pages_parse() {
    let first = parse_lever_page(&fixture_json("lever/page1.json"), Some("Northwind")).unwrap();
    let second = parse_lever_page(&fixture_json("lever/page2.json"), Some("Northwind")).unwrap();
    assert_eq!(first.postings.len(), 2);
    assert_eq!(second.postings.len(), 1);

    let qa = &first.postings[1];
    assert_eq!(
        qa.apply_url.as_deref(),
        Some("https://jobs.lever.co/northwind/5f1c2a10-0002")
    );
    assert_eq!(qa.remote, None);
    assert_eq!(qa.description.as_deref(), Some("<div>Own our Cypress and Selenium suites.</div>"));
}

#[test]
fn smartrecruiters_fixture_reports_total() {
    let (parsed, total) =
        parse_smartrecruiters_page(&fixture_json("smartrecruiters/postings.json"), None).unwrap();
    assert_eq!(total, Some(2));
    assert_eq!(parsed.postings.len(), 2);
    let ml = &parsed.postings[0];
    assert_eq!(ml.company.as_deref(), Some("Bosch Group"));
    assert_eq!(ml.remote, Some(true));
    assert_eq!(ml.location.as_deref(), Some("Stuttgart, de"));
    assert_eq!(parsed.postings[1].description, None);
}

#[test]
fn json_board_fixture_skips_metadata_and_broken_entries() {
    let body = fs::read(fixture("feeds/remote_board.json")).unwrap();
    let parsed = parse_json_feed(&body).unwrap();
    assert_eq!(parsed.malformed, 2);
    assert_eq!(parsed.postings.len(), 2);

    let devops = &parsed.postings[0];
    assert_eq!(devops.apply_url.as_deref(), Some("https://remoteboard.example/l/1093421"));
    assert_eq!(devops.source_job_id.as_deref(), Some("1093421"));
    assert_eq!((devops.salary_min, devops.salary_max), (Some(110_000), Some(140_000)));
}

#[test]
fn rss_fixture_reads_items() {
    let body = fs::read(fixture("feeds/board.rss")).unwrap();
    let parsed = parse_rss_feed(&body).unwrap();
    assert_eq!(parsed.malformed, 1);
    assert_eq!(parsed.postings.len(), 2);

    let rust = &parsed.postings[0];
    assert_eq!(rust.title.as_deref(), Some("Senior Rust Engineer"));
    assert_eq!(rust.company.as_deref(), Some("Ferrous Labs"));
    assert_eq!(rust.location.as_deref(), Some("Anywhere in the World"));
    assert_eq!(
        rust.description.as_deref(),
        Some("<p>Backend services in Rust. 140k-170k USD.</p>")
    );

    let analyst = &parsed.postings[1];
    assert_eq!(analyst.company.as_deref(), Some("Tallyho"));
    assert_eq!(analyst.title.as_deref(), Some("Data Analyst"));
}

#[tokio::test]
async fn transport_failure_names_the_source() {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(2),
        backoff: BackoffPolicy {
            max_retries: 0,
            ..BackoffPolicy::default()
        },
        ..HttpClientConfig::default()
    })
    .unwrap();
    let source = SourceConfig {
        name: "unreachable".to_string(),
        kind: SourceKind::GenericFeed,
        endpoint: "http://127.0.0.1:9/jobs.json".to_string(),
        timeout_ms: 2_000,
        max_pages: 1,
        provider: None,
        company: None,
        format: FeedFormat::Json,
        page_size: 100,
        enabled: true,
    };

    let err = adapter_for_kind(source.kind)
        .fetch(&http, &source)
        .await
        .unwrap_err();
    assert_eq!(err.source_name, "unreachable");
    assert!(matches!(err.cause, FetchCause::Http(_)));
}

#[tokio::test]
async fn ats_source_without_provider_fails_with_decode_cause() {
    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    let source = SourceConfig {
        name: "misconfigured".to_string(),
        kind: SourceKind::AtsApi,
        endpoint: "https://boards-api.greenhouse.io/v1/boards/acme/jobs".to_string(),
        timeout_ms: 1_000,
        max_pages: 1,
        provider: None,
        company: None,
        format: FeedFormat::Json,
        page_size: 100,
        enabled: true,
    };
    let err = adapter_for_kind(SourceKind::AtsApi)
        .fetch(&http, &source)
        .await
        .unwrap_err();
    assert!(matches!(err.cause, FetchCause::Decode(_)));
}
