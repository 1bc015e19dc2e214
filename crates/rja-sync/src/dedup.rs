use std::collections::{HashMap, HashSet};

use rja_core::Job;
use serde::Serialize;
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DuplicateInBatch,
    Unchanged,
    SimilarityMatch,
    Superseded,
    IdentityConflict,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::DuplicateInBatch => "duplicate_in_batch",
            SkipReason::Unchanged => "unchanged",
            SkipReason::SimilarityMatch => "similarity_match",
            SkipReason::Superseded => "superseded",
            SkipReason::IdentityConflict => "identity_conflict",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    /// 1.0 means folded titles must be equal; lower values accept
    /// Jaro-Winkler scores at or above the threshold.
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 1.0,
        }
    }
}

/// Classified jobs from one adapter call, in adapter order.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedJob {
    pub job: Job,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub source: String,
    pub to_insert: Vec<Job>,
    /// Carries the stored `id` and `created_at` with the new content.
    pub to_update: Vec<Job>,
    pub to_skip: Vec<SkippedJob>,
}

impl Partition {
    fn skip(&mut self, job: Job, reason: SkipReason) {
        self.to_skip.push(SkippedJob { job, reason });
    }
}

#[derive(Debug, Clone)]
struct SimilarityEntry {
    source: String,
    title: String,
}

/// Storage identities overlaid with the decisions made so far in this run.
#[derive(Debug, Default)]
struct RunView {
    by_key: HashMap<String, Job>,
    key_by_id: HashMap<String, String>,
    by_company: HashMap<String, Vec<SimilarityEntry>>,
}

impl RunView {
    fn record(&mut self, key: String, job: Job) {
        self.key_by_id.insert(job.id.clone(), key.clone());
        self.by_company
            .entry(DedupEngine::normalize_key_fragment(&job.company))
            .or_default()
            .push(SimilarityEntry {
                source: job.source.clone(),
                title: DedupEngine::normalize_key_fragment(&job.title),
            });
        self.by_key.insert(key, job);
    }

    fn replace(&mut self, key: &str, job: Job) {
        if let Some(slot) = self.by_key.get_mut(key) {
            *slot = job;
        }
    }
}

pub struct DedupEngine {
    config: DedupConfig,
    view: RunView,
}

impl DedupEngine {
    pub fn new(config: DedupConfig, existing: impl IntoIterator<Item = Job>) -> Self {
        let mut view = RunView::default();
        for job in existing {
            view.record(job.apply_url_key(), job);
        }
        Self { config, view }
    }

    /// Lowercase, punctuation to spaces, whitespace collapsed.
    pub fn normalize_key_fragment(input: &str) -> String {
        input
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn titles_match(&self, a: &str, b: &str) -> bool {
        if self.config.similarity_threshold >= 1.0 {
            a == b
        } else {
            jaro_winkler(a, b) >= self.config.similarity_threshold
        }
    }

    fn similar_from_other_source(&self, job: &Job) -> bool {
        let company = Self::normalize_key_fragment(&job.company);
        let title = Self::normalize_key_fragment(&job.title);
        self.view.by_company.get(&company).is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.source != job.source && self.titles_match(&e.title, &title))
        })
    }

    /// Partitions every batch of a run, in order. A job whose URL reappears
    /// with different content in a later batch only seeds the row when the
    /// URL is not yet known, so the later content wins without the earlier
    /// one rewriting it on every run.
    pub fn partition_run(&mut self, batches: Vec<SourceBatch>) -> Vec<Partition> {
        let firsts: Vec<Vec<bool>> = batches.iter().map(first_occurrences).collect();

        let mut last_seen: HashMap<String, (usize, usize)> = HashMap::new();
        for (b, batch) in batches.iter().enumerate() {
            for (j, job) in batch.jobs.iter().enumerate() {
                if firsts[b][j] {
                    last_seen.insert(job.apply_url_key(), (b, j));
                }
            }
        }
        let superseded: Vec<Vec<bool>> = batches
            .iter()
            .enumerate()
            .map(|(b, batch)| {
                batch
                    .jobs
                    .iter()
                    .map(|job| match last_seen.get(&job.apply_url_key()) {
                        Some(&(lb, lj)) if lb > b => !batches[lb].jobs[lj].same_content(job),
                        _ => false,
                    })
                    .collect()
            })
            .collect();

        batches
            .into_iter()
            .enumerate()
            .map(|(b, batch)| self.partition_batch(batch, &firsts[b], &superseded[b]))
            .collect()
    }

    fn partition_batch(&mut self, batch: SourceBatch, firsts: &[bool], superseded: &[bool]) -> Partition {
        let mut out = Partition {
            source: batch.source,
            ..Partition::default()
        };

        for (i, job) in batch.jobs.into_iter().enumerate() {
            if !firsts[i] {
                out.skip(job, SkipReason::DuplicateInBatch);
                continue;
            }
            let key = job.apply_url_key();

            if self
                .view
                .key_by_id
                .get(&job.id)
                .is_some_and(|owner| *owner != key)
            {
                out.skip(job, SkipReason::IdentityConflict);
                continue;
            }

            if let Some(existing) = self.view.by_key.get(&key) {
                if superseded[i] {
                    out.skip(job, SkipReason::Superseded);
                } else if existing.same_content(&job) {
                    out.skip(job, SkipReason::Unchanged);
                } else {
                    let updated = Job {
                        id: existing.id.clone(),
                        created_at: existing.created_at,
                        ..job
                    };
                    self.view.replace(&key, updated.clone());
                    out.to_update.push(updated);
                }
                continue;
            }

            if self.similar_from_other_source(&job) {
                out.skip(job, SkipReason::SimilarityMatch);
                continue;
            }

            self.view.record(key, job.clone());
            out.to_insert.push(job);
        }
        out
    }
}

/// `true` for the first job carrying each `apply_url` key and `id`.
fn first_occurrences(batch: &SourceBatch) -> Vec<bool> {
    let mut keys = HashSet::new();
    let mut ids = HashSet::new();
    batch
        .jobs
        .iter()
        .map(|job| {
            let new_key = keys.insert(job.apply_url_key());
            let new_id = ids.insert(job.id.clone());
            new_key && new_id
        })
        .collect()
}
