//! civic-ingest binary: loads configuration and the source catalog, then runs
//! the scheduler loop, one tick, a manual trigger, or a due-ness report.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use civic_ingest::cli::{Cli, Commands};
use civic_ingest::config::IngestConfig;
use civic_ingest::ingest::catalog::{self, Catalog};
use civic_ingest::ingest::http::HttpClient;
use civic_ingest::ingest::scheduler::spawn_scheduler;
use civic_ingest::ingest::store::{MemoryStore, SourceStore};
use civic_ingest::metrics::Metrics;
use civic_ingest::{Orchestrator, Scheduler};

/// Compact logs by default, JSON lines with LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("civic_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<IngestConfig> {
    match path {
        Some(p) => IngestConfig::load_from_file(p),
        None => IngestConfig::load_default(),
    }
}

fn load_catalog(path: Option<&PathBuf>) -> Result<Catalog> {
    match path {
        Some(p) => catalog::load_catalog_from(p),
        None => catalog::load_catalog_default(),
    }
}

/// Snapshot hook shared by every command.
#[derive(Clone)]
struct Snapshot {
    store: Arc<MemoryStore>,
    path: Option<PathBuf>,
}

impl Snapshot {
    fn open(cfg: &IngestConfig) -> Result<Self> {
        let path = cfg.store.snapshot_path.clone();
        let store = match &path {
            Some(p) => MemoryStore::load(p)
                .with_context(|| format!("loading store snapshot {}", p.display()))?,
            None => MemoryStore::new(),
        };
        Ok(Self {
            store: Arc::new(store),
            path,
        })
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        if let Err(e) = self.store.persist(path) {
            tracing::warn!(error = %e, path = %path.display(), "store snapshot failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        Metrics::install(addr)?;
    }

    let cfg = Arc::new(load_config(cli.config.as_ref())?);
    let catalog = load_catalog(cli.sources.as_ref())?;
    tracing::info!(
        localities = catalog.localities.len(),
        sources = catalog.sources.len(),
        "source catalog loaded"
    );

    let snapshot = Snapshot::open(&cfg)?;
    snapshot.store.replace_sources(catalog.sources)?;

    let http = HttpClient::new(&cfg.http)?;
    let orchestrator = Orchestrator::new(snapshot.store.clone(), http, cfg.clone());
    let scheduler = Scheduler::new(orchestrator.clone());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let hook = snapshot.clone();
            let handle = spawn_scheduler(scheduler, move || hook.save());
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            handle.abort();
            snapshot.save();
            tracing::info!("scheduler stopped");
        }
        Commands::Tick => {
            let runs = scheduler.tick(Utc::now()).await?;
            snapshot.save();
            for run in runs {
                println!(
                    "source {:>5}  run {:>5}  {:<8} found={} written={}{}",
                    run.source_id,
                    run.id,
                    run.status.as_str(),
                    run.items_found,
                    run.items_written,
                    run.error_message
                        .map(|m| format!("  error={m}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Trigger { source_id } => {
            let source = snapshot
                .store
                .get_source(source_id)
                .await?
                .ok_or_else(|| anyhow!("no source with id {source_id} in the catalog"))?;
            let run = orchestrator.trigger(&source).await?;
            snapshot.save();
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::Due => {
            for d in scheduler.evaluate_all(Utc::now()).await? {
                println!(
                    "{:>5}  {:<7} {:<8} {:<32} {}",
                    d.source.id,
                    if d.decision.due { "DUE" } else { "-" },
                    format!("{:?}", d.source.frequency).to_lowercase(),
                    d.source.name,
                    d.decision.reason
                );
            }
        }
    }
    Ok(())
}
