use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dedup::SkipReason;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub fetched: usize,
    pub normalized: usize,
    pub classified: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Feed entries that could not be read as postings.
    pub malformed: usize,
    /// Postings rejected by the normalizer.
    pub invalid: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
}

impl SourceStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_default() += 1;
    }

    fn add(&mut self, other: &SourceStats) {
        self.fetched += other.fetched;
        self.normalized += other.normalized;
        self.classified += other.classified;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.malformed += other.malformed;
        self.invalid += other.invalid;
        for (reason, count) in &other.skip_reasons {
            *self.skip_reasons.entry(*reason).or_default() += count;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub per_source: BTreeMap<String, SourceStats>,
    pub errors: Vec<RunError>,
}

impl RunStats {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            cancelled: false,
            per_source: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn source_mut(&mut self, source: &str) -> &mut SourceStats {
        self.per_source.entry(source.to_string()).or_default()
    }

    pub fn push_error(&mut self, source: &str, message: impl Into<String>) {
        self.errors.push(RunError {
            source: source.to_string(),
            message: message.into(),
        });
    }

    pub fn totals(&self) -> SourceStats {
        let mut totals = SourceStats::default();
        for stats in self.per_source.values() {
            totals.add(stats);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_sources_and_reasons() {
        let mut stats = RunStats::new(Uuid::nil(), Utc::now());
        stats.source_mut("a").inserted = 2;
        stats.source_mut("a").record_skip(SkipReason::Unchanged);
        stats.source_mut("b").record_skip(SkipReason::Unchanged);
        stats.source_mut("b").record_skip(SkipReason::SimilarityMatch);

        let totals = stats.totals();
        assert_eq!(totals.inserted, 2);
        assert_eq!(totals.skipped, 3);
        assert_eq!(totals.skip_reasons[&SkipReason::Unchanged], 2);
    }

    #[test]
    fn serializes_skip_reasons_by_name() {
        let mut stats = SourceStats::default();
        stats.record_skip(SkipReason::DuplicateInBatch);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["skip_reasons"]["duplicate_in_batch"], 1);
    }
}
