use std::time::Duration;

use rja_core::Job;
use rja_storage::{JobStore, StoreError, UpsertOutcome};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("writing {apply_url}: {source}")]
pub struct SinkError {
    pub apply_url: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Default)]
pub struct SinkOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<SinkError>,
}

/// Applies dedup decisions one statement per job.
pub struct UpsertSink<'a> {
    store: &'a dyn JobStore,
    retry_delay: Duration,
}

impl<'a> UpsertSink<'a> {
    pub fn new(store: &'a dyn JobStore, retry_delay: Duration) -> Self {
        Self { store, retry_delay }
    }

    pub async fn apply(&self, to_insert: &[Job], to_update: &[Job]) -> SinkOutcome {
        let mut outcome = SinkOutcome::default();
        for job in to_insert.iter().chain(to_update) {
            match self.write(job).await {
                Ok(UpsertOutcome::Inserted) => outcome.inserted += 1,
                Ok(UpsertOutcome::Updated) => outcome.updated += 1,
                Err(err) => {
                    warn!(apply_url = %err.apply_url, error = %err.source, "upsert failed");
                    outcome.failed += 1;
                    outcome.errors.push(err);
                }
            }
        }
        outcome
    }

    /// One retry after `retry_delay`; identity conflicts are not retried.
    async fn write(&self, job: &Job) -> Result<UpsertOutcome, SinkError> {
        let first = match self.store.upsert(job).await {
            Ok(done) => return Ok(done),
            Err(err @ StoreError::IdConflict { .. }) => {
                return Err(SinkError {
                    apply_url: job.apply_url.clone(),
                    source: err,
                })
            }
            Err(err) => err,
        };
        debug!(apply_url = %job.apply_url, error = %first, "retrying upsert");
        tokio::time::sleep(self.retry_delay).await;
        self.store.upsert(job).await.map_err(|source| SinkError {
            apply_url: job.apply_url.clone(),
            source,
        })
    }
}
