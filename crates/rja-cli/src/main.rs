use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rja_storage::{JobStore, MemoryJobStore, PgJobStore};
use rja_sync::{pipeline_from_config, RunStats, SourceRegistry, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "rja")]
#[command(about = "Remote jobs aggregator: ingest postings into Postgres")]
struct Cli {
    /// Source registry; overrides RJA_SOURCES_FILE.
    #[arg(long, global = true)]
    sources: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion pass over every enabled source.
    Sync {
        /// Dedup against the database but write to memory only.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply embedded database migrations.
    Migrate,
    /// List configured sources.
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(path) = cli.sources {
        config.sources_file = path;
    }

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => {
            let stats = sync(&config, dry_run).await?;
            let totals = stats.totals();
            println!(
                "sync complete: run_id={} inserted={} updated={} skipped={} failed={} errors={}{}",
                stats.run_id,
                totals.inserted,
                totals.updated,
                totals.skipped,
                totals.failed,
                stats.errors.len(),
                if stats.cancelled { " (cancelled)" } else { "" }
            );
        }
        Commands::Migrate => {
            let store = PgJobStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.sources_file).await?;
            for source in &registry.sources {
                println!(
                    "{}\t{:?}\t{}\t{}",
                    source.name,
                    source.kind,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.endpoint
                );
            }
        }
    }

    Ok(())
}

async fn sync(config: &SyncConfig, dry_run: bool) -> Result<RunStats> {
    let registry = SourceRegistry::load(&config.sources_file).await?;
    let store: Arc<dyn JobStore> = if dry_run {
        Arc::new(dry_run_store(config).await)
    } else {
        let store = PgJobStore::connect(&config.database_url)
            .await
            .context("connecting to database")?;
        store.migrate().await.context("running migrations")?;
        Arc::new(store)
    };
    let pipeline = pipeline_from_config(config, store)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    pipeline.run_once(&registry.sources, &cancel).await
}

/// Memory store seeded from Postgres when it is reachable, empty otherwise.
async fn dry_run_store(config: &SyncConfig) -> MemoryJobStore {
    let existing = match PgJobStore::connect(&config.database_url).await {
        Ok(pg) => pg.load_jobs().await,
        Err(err) => Err(err),
    };
    match existing {
        Ok(jobs) => {
            info!(jobs = jobs.len(), "dry run seeded from database");
            MemoryJobStore::with_jobs(jobs)
        }
        Err(err) => {
            warn!(error = %err, "database unavailable, dry run starts empty");
            MemoryJobStore::new()
        }
    }
}
