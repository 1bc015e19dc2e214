use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::stats::RunStats;

/// Writes `<reports_root>/<run_id>/{run_stats.json,summary.md}`.
pub async fn write_reports(reports_root: &Path, stats: &RunStats) -> Result<PathBuf> {
    let reports_dir = reports_root.join(stats.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(stats).context("serializing run stats")?;
    fs::write(reports_dir.join("run_stats.json"), json)
        .await
        .context("writing run_stats.json")?;
    fs::write(reports_dir.join("summary.md"), summary_markdown(stats))
        .await
        .context("writing summary.md")?;

    Ok(reports_dir)
}

pub fn summary_markdown(stats: &RunStats) -> String {
    let totals = stats.totals();
    let mut out = format!(
        "# RJA Sync Run\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Cancelled: {}\n- Inserted: {}\n- Updated: {}\n- Skipped: {}\n- Failed: {}\n\n## Sources\n\n| source | fetched | normalized | inserted | updated | skipped | failed | malformed | invalid |\n|---|---|---|---|---|---|---|---|---|\n",
        stats.run_id,
        stats.started_at,
        stats.finished_at,
        stats.cancelled,
        totals.inserted,
        totals.updated,
        totals.skipped,
        totals.failed,
    );
    for (name, s) in &stats.per_source {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            name, s.fetched, s.normalized, s.inserted, s.updated, s.skipped, s.failed, s.malformed, s.invalid
        );
    }
    if !stats.errors.is_empty() {
        out.push_str("\n## Errors\n\n");
        for err in &stats.errors {
            let _ = writeln!(out, "- {}: {}", err.source, err.message);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn writes_json_and_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stats = RunStats::new(Uuid::new_v4(), Utc::now());
        stats.source_mut("greenhouse-acme").inserted = 3;
        stats.push_error("lever-northwind", "source lever-northwind: timed out after 30s");

        let dir = write_reports(tmp.path(), &stats).await.unwrap();
        assert_eq!(dir, tmp.path().join(stats.run_id.to_string()));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("run_stats.json")).unwrap())
                .unwrap();
        assert_eq!(json["per_source"]["greenhouse-acme"]["inserted"], 3);
        assert_eq!(json["errors"][0]["source"], "lever-northwind");

        let md = std::fs::read_to_string(dir.join("summary.md")).unwrap();
        assert!(md.contains("| greenhouse-acme | 0 | 0 | 3 |"));
        assert!(md.contains("- lever-northwind: source lever-northwind"));
    }
}
