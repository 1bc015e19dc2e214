//! Core domain model, source configuration and identity rules for RJA.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "rja-core";

/// Fixed domain taxonomy a job is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "DevOps")]
    DevOps,
    #[serde(rename = "Cloud/AWS")]
    CloudAws,
    #[serde(rename = "Java")]
    Java,
    #[serde(rename = "Backend")]
    Backend,
    #[serde(rename = "Frontend")]
    Frontend,
    #[serde(rename = "Data/ML")]
    DataMl,
    #[serde(rename = "QA")]
    Qa,
    #[serde(rename = "PM")]
    Pm,
    #[serde(rename = "Other")]
    Other,
}

impl Domain {
    pub const ALL: [Domain; 9] = [
        Domain::DevOps,
        Domain::CloudAws,
        Domain::Java,
        Domain::Backend,
        Domain::Frontend,
        Domain::DataMl,
        Domain::Qa,
        Domain::Pm,
        Domain::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::DevOps => "DevOps",
            Domain::CloudAws => "Cloud/AWS",
            Domain::Java => "Java",
            Domain::Backend => "Backend",
            Domain::Frontend => "Frontend",
            Domain::DataMl => "Data/ML",
            Domain::Qa => "QA",
            Domain::Pm => "PM",
            Domain::Other => "Other",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown domain {0:?}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownDomain(trimmed.to_string()))
    }
}

/// Unvalidated provider-native listing, handed from adapters to the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source_job_id: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    /// Explicit remote flag when the provider exposes one.
    pub remote: Option<bool>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    /// Free-text salary such as "$120k - $150k".
    pub salary_text: Option<String>,
}

/// Canonical persisted job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub company: String,
    pub description: String,
    pub apply_url: String,
    pub location: Option<String>,
    pub remote: bool,
    pub salary_min: Option<u32>,
    pub salary_max: Option<u32>,
    pub domain: Domain,
    pub source: String,
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Comparison key used for uniqueness of `apply_url`.
    pub fn apply_url_key(&self) -> String {
        apply_url_key(&self.apply_url)
    }

    /// True when every content field that an update would replace is equal.
    pub fn same_content(&self, other: &Job) -> bool {
        self.title == other.title
            && self.company == other.company
            && self.description == other.description
            && self.location == other.location
            && self.remote == other.remote
            && self.salary_min == other.salary_min
            && self.salary_max == other.salary_max
            && self.domain == other.domain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    AtsApi,
    GenericFeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtsProvider {
    Greenhouse,
    Lever,
    #[serde(rename = "smartrecruiters")]
    SmartRecruiters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    #[default]
    Json,
    Rss,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_pages() -> u32 {
    10
}

fn default_page_size() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

/// One configured source, as listed in `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub provider: Option<AtsProvider>,
    /// Company name used when the payload does not carry one.
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub format: FeedFormat,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Case- and trailing-slash-insensitive comparison key for an apply URL.
///
/// The query is kept because several ATS boards encode the posting id there
/// (`?gh_jid=123`); the fragment is dropped.
pub fn apply_url_key(apply_url: &str) -> String {
    let trimmed = apply_url.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };
    let mut key = format!(
        "{}://{}{}",
        url.scheme(),
        authority(&url),
        url.path().trim_end_matches('/')
    );
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        key.push('?');
        key.push_str(query);
    }
    key.to_lowercase()
}

/// Lower-cased scheme+host+path with the query stripped.
pub fn identity_url_form(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        authority(url),
        url.path().trim_end_matches('/')
    )
    .to_lowercase()
}

/// Deterministic job id: `(source, source_job_id)` when the provider id is
/// known, otherwise the normalized apply URL.
pub fn identity_key(source: &str, source_job_id: Option<&str>, apply_url: &Url) -> String {
    let name = match source_job_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(job_id) => format!("{}:{}", source.trim(), job_id),
        None => format!("url:{}", identity_url_form(apply_url)),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}
