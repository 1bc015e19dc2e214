//! Ingestion pipeline: normalize, classify, dedup and upsert fetched postings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rja_storage::{HttpClientConfig, HttpFetcher, JobStore, TokenBucketConfig};

pub mod classify;
pub mod config;
pub mod dedup;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod stats;

pub use classify::{Classifier, DomainRule, RulesError};
pub use config::{RegistryError, SourceRegistry, SyncConfig};
pub use dedup::{DedupConfig, DedupEngine, Partition, SkipReason, SkippedJob, SourceBatch};
pub use normalize::{NormalizationError, NormalizationReason, Normalizer};
pub use pipeline::SyncPipeline;
pub use report::write_reports;
pub use sink::{SinkError, SinkOutcome, UpsertSink};
pub use stats::{RunError, RunStats, SourceStats};

pub const CRATE_NAME: &str = "rja-sync";

/// Wires a pipeline from environment-derived settings.
pub fn pipeline_from_config(config: &SyncConfig, store: Arc<dyn JobStore>) -> Result<SyncPipeline> {
    let classifier = match &config.rules_file {
        Some(path) => Classifier::load(path)?,
        None => Classifier::builtin()?,
    };
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(30),
        user_agent: Some(config.user_agent.clone()),
        global_concurrency: config.max_concurrency,
        token_bucket: config
            .requests_per_second
            .and_then(TokenBucketConfig::per_second),
        ..Default::default()
    })
    .context("building http client")?;

    Ok(SyncPipeline::new(store, http, classifier)?
        .with_max_concurrency(config.max_concurrency)
        .with_dedup_config(DedupConfig {
            similarity_threshold: config.similarity_threshold,
        })
        .with_reports_dir(config.reports_dir.clone()))
}
