use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rja_adapters::{adapter_for_kind, FetchCause, FetchError, FetchedBatch, SourceAdapter};
use rja_core::{SourceConfig, SourceKind};
use rja_storage::{BackoffPolicy, HttpFetcher, JobStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classify::Classifier;
use crate::dedup::{DedupConfig, DedupEngine, SourceBatch};
use crate::normalize::Normalizer;
use crate::report::write_reports;
use crate::sink::UpsertSink;
use crate::stats::RunStats;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Coordinates one ingestion run: concurrent fetches, per-batch
/// normalization and classification, then serialized dedup and upserts.
pub struct SyncPipeline {
    store: Arc<dyn JobStore>,
    http: HttpFetcher,
    normalizer: Normalizer,
    classifier: Classifier,
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
    dedup: DedupConfig,
    max_concurrency: usize,
    retry_delay: Duration,
    reports_dir: Option<PathBuf>,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn JobStore>, http: HttpFetcher, classifier: Classifier) -> Result<Self> {
        let adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>> = [SourceKind::AtsApi, SourceKind::GenericFeed]
            .into_iter()
            .map(|kind| (kind, Arc::from(adapter_for_kind(kind))))
            .collect();
        Ok(Self {
            store,
            http,
            normalizer: Normalizer::new().context("compiling normalizer patterns")?,
            classifier,
            adapters,
            dedup: DedupConfig::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry_delay: BackoffPolicy::default().delay_for_attempt(0),
            reports_dir: None,
        })
    }

    pub fn with_adapter(mut self, kind: SourceKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn with_dedup_config(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_reports_dir(mut self, reports_dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(reports_dir.into());
        self
    }

    pub async fn run_once(
        &self,
        sources: &[SourceConfig],
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let run_id = Uuid::new_v4();
        let mut stats = RunStats::new(run_id, Utc::now());
        let span = info_span!("sync_run", %run_id);

        async move {
            let existing = self
                .store
                .load_jobs()
                .await
                .context("loading identity index from storage")?;

            let enabled: Vec<&SourceConfig> = sources.iter().filter(|s| s.enabled).collect();
            for source in &enabled {
                stats.source_mut(&source.name);
            }
            let concurrency = enabled.len().min(self.max_concurrency).max(1);
            info!(sources = enabled.len(), concurrency, stored = existing.len(), "starting sync run");

            let mut fetches = stream::iter(enabled.iter().copied())
                .map(|source| async move { (source, self.fetch_source(source, cancel).await) })
                .buffered(concurrency);

            let mut batches = Vec::new();
            while let Some((source, result)) = fetches.next().await {
                match result {
                    Ok(fetched) => batches.push(self.prepare_batch(source, fetched, &mut stats)),
                    Err(err) => {
                        warn!(source = %source.name, error = %err, "source failed");
                        stats.push_error(&source.name, err.to_string());
                    }
                }
            }

            let mut dedup = DedupEngine::new(self.dedup, existing);
            let sink = UpsertSink::new(self.store.as_ref(), self.retry_delay);
            for partition in dedup.partition_run(batches) {
                let outcome = sink.apply(&partition.to_insert, &partition.to_update).await;
                let entry = stats.source_mut(&partition.source);
                for skipped in &partition.to_skip {
                    entry.record_skip(skipped.reason);
                }
                entry.inserted += outcome.inserted;
                entry.updated += outcome.updated;
                entry.failed += outcome.failed;
                for err in outcome.errors {
                    stats.push_error(&partition.source, err.to_string());
                }
            }

            stats.cancelled = cancel.is_cancelled();
            stats.finished_at = Utc::now();
            let totals = stats.totals();
            info!(
                inserted = totals.inserted,
                updated = totals.updated,
                skipped = totals.skipped,
                failed = totals.failed,
                errors = stats.errors.len(),
                cancelled = stats.cancelled,
                "sync run finished"
            );

            if let Some(dir) = &self.reports_dir {
                match write_reports(dir, &stats).await {
                    Ok(path) => info!(reports_dir = %path.display(), "wrote run reports"),
                    Err(err) => warn!(error = %err, "could not write run reports"),
                }
            }
            Ok::<_, anyhow::Error>(stats)
        }
        .instrument(span)
        .await
    }

    async fn fetch_source(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<FetchedBatch, FetchError> {
        let Some(adapter) = self.adapters.get(&source.kind) else {
            return Err(FetchError::decode(&source.name, "no adapter registered for source kind"));
        };
        let timeout = source.timeout();
        let span = info_span!("source_fetch", source = %source.name);
        async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::new(source.name.clone(), FetchCause::Cancelled)),
                result = tokio::time::timeout(timeout, adapter.fetch(&self.http, source)) => {
                    result.unwrap_or_else(|_| {
                        Err(FetchError::new(source.name.clone(), FetchCause::Timeout(timeout)))
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    fn prepare_batch(
        &self,
        source: &SourceConfig,
        fetched: FetchedBatch,
        stats: &mut RunStats,
    ) -> SourceBatch {
        let observed_at = Utc::now();
        let entry = stats.source_mut(&source.name);
        entry.fetched += fetched.postings.len();
        entry.malformed += fetched.malformed;

        let mut jobs = Vec::with_capacity(fetched.postings.len());
        for raw in &fetched.postings {
            match self.normalizer.normalize(raw, &source.name, observed_at) {
                Ok(mut job) => {
                    entry.normalized += 1;
                    job.domain = self.classifier.classify_job(&job);
                    entry.classified += 1;
                    jobs.push(job);
                }
                Err(err) => {
                    entry.invalid += 1;
                    warn!(
                        source = %source.name,
                        title = raw.title.as_deref().unwrap_or_default(),
                        error = %err,
                        "skipping posting"
                    );
                }
            }
        }
        SourceBatch {
            source: source.name.clone(),
            jobs,
        }
    }
}
