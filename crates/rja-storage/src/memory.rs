use std::collections::BTreeMap;

use async_trait::async_trait;
use rja_core::{apply_url_key, Job};
use tokio::sync::RwLock;

use crate::jobs::{JobPage, JobQuery, JobStore, StoreError, UpsertOutcome};

/// In-process store with the same conflict rules as the Postgres table.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: RwLock<BTreeMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. from a snapshot of the real table for a dry run.
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let rows = jobs
            .into_iter()
            .map(|job| (job.apply_url_key(), job))
            .collect();
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub async fn snapshot(&self) -> Vec<Job> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn upsert(&self, job: &Job) -> Result<UpsertOutcome, StoreError> {
        let key = job.apply_url_key();
        let mut rows = self.rows.write().await;

        if let Some((_, other)) = rows
            .iter()
            .find(|(other_key, other)| **other_key != key && other.id == job.id)
        {
            return Err(StoreError::IdConflict {
                id: job.id.clone(),
                existing_apply_url: other.apply_url.clone(),
            });
        }

        match rows.get_mut(&key) {
            Some(existing) => {
                let id = std::mem::take(&mut existing.id);
                let created_at = existing.created_at;
                *existing = Job {
                    id,
                    created_at,
                    ..job.clone()
                };
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.insert(key, job.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn find_by_apply_url(&self, apply_url: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.rows.read().await.get(&apply_url_key(apply_url)).cloned())
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, StoreError> {
        let rows = self.rows.read().await;
        let mut matching: Vec<&Job> = rows.values().filter(|job| query.matches(job)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let jobs = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.effective_limit() as usize)
            .cloned()
            .collect();
        Ok(JobPage::new(jobs, query, total))
    }
}
