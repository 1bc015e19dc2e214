use async_trait::async_trait;
use rja_core::{Domain, Job};
use serde::Serialize;
use thiserror::Error;

pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("job id {id} already belongs to {existing_apply_url}")]
    IdConflict {
        id: String,
        existing_apply_url: String,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Filter + page request for the job listing read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub domain: Option<Domain>,
    pub remote: Option<bool>,
    /// Case-insensitive substring over title or company.
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl JobQuery {
    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        }
    }

    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.effective_page() - 1) * u64::from(self.effective_limit())
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn matches(&self, job: &Job) -> bool {
        if self.domain.is_some_and(|d| d != job.domain) {
            return false;
        }
        if self.remote.is_some_and(|r| r != job.remote) {
            return false;
        }
        match self.search_term() {
            Some(term) => {
                let term = term.to_lowercase();
                job.title.to_lowercase().contains(&term)
                    || job.company.to_lowercase().contains(&term)
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub page: u32,
    pub pages: u32,
    pub total: u64,
}

impl JobPage {
    pub(crate) fn new(jobs: Vec<Job>, query: &JobQuery, total: u64) -> Self {
        let limit = u64::from(query.effective_limit());
        let pages = total.div_ceil(limit);
        Self {
            jobs,
            page: query.effective_page(),
            pages: u32::try_from(pages).unwrap_or(u32::MAX),
            total,
        }
    }
}

/// Persistence port for canonical jobs. Rows are keyed by
/// [`Job::apply_url_key`]; `id` and `created_at` survive updates.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Every persisted job, used to build the dedup identity index.
    async fn load_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn upsert(&self, job: &Job) -> Result<UpsertOutcome, StoreError>;

    async fn find_by_apply_url(&self, apply_url: &str) -> Result<Option<Job>, StoreError>;

    async fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, StoreError>;
}
