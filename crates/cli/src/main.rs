//! gleaner: runs the configured fetchers until they finish or Ctrl-C.

mod cli;
mod jobs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use tracing::{error, info, warn};

use gleaner_core::config::load_dotenv;
use gleaner_core::manifest::load_manifests;
use gleaner_core::{Config, FetchMode};
use gleaner_fetch::{
    log_announcement, CommandInvoker, EngineContext, Fetcher, FetcherRegistry, Invoker,
};
use gleaner_storage::{Database, MemorySink, MemoryWatermarkStore};

use crate::cli::Cli;
use crate::jobs::{collect_jobs, Selection};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.manifest_dir.clone() {
        config.harvest.manifest_dir = dir;
    }
    config.log_summary();

    let manifests = load_manifests(&config.harvest.manifest_dir).with_context(|| {
        format!(
            "failed to read manifests from {}",
            config.harvest.manifest_dir.display()
        )
    })?;
    if manifests.is_empty() {
        info!("no campaign manifests found, nothing to do");
        return Ok(());
    }

    let selection = Selection {
        only: &cli.only,
        once: cli.once,
    };
    let jobs = collect_jobs(&manifests, &selection, &config.harvest.default_cli_binary)
        .context("invalid fetcher configuration")?;
    if jobs.is_empty() {
        info!("no enabled fetchers selected, nothing to do");
        return Ok(());
    }

    let invoker: Arc<dyn Invoker> = match cli.command_timeout {
        Some(secs) => Arc::new(CommandInvoker::with_timeout(Duration::from_secs(secs))),
        None => Arc::new(CommandInvoker::new()),
    };

    let (ctx, database) = if cli.memory {
        info!("using in-memory stores; nothing will be kept after exit");
        let ctx = EngineContext::new(
            invoker,
            Arc::new(MemoryWatermarkStore::new()),
            Arc::new(MemorySink::new()),
        );
        (ctx, None)
    } else {
        let db = Database::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?;
        let ctx = EngineContext::new(invoker, Arc::new(db.watermarks()), Arc::new(db.sink()));
        (ctx, Some(db))
    };

    let registry = FetcherRegistry::with_defaults();
    let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
    for job in jobs {
        let campaign = job.campaign_id.clone();
        match registry.build(job, ctx.clone()) {
            Ok(fetcher) => fetchers.push(fetcher),
            Err(e) => warn!(
                campaign = %campaign,
                error = %e,
                known_types = ?registry.types(),
                "skipping fetcher"
            ),
        }
    }

    let mut started = Vec::new();
    for fetcher in fetchers {
        fetcher.subscribe(Arc::new(log_announcement));
        match fetcher.start() {
            Ok(()) => started.push(fetcher),
            Err(e) => error!(
                campaign = %fetcher.job().campaign_id,
                job_key = %fetcher.job().short_key(),
                error = %e,
                "failed to start fetcher"
            ),
        }
    }
    info!(fetchers = started.len(), "gleaner running");

    let all_one_shot = started.iter().all(|f| f.job().mode == FetchMode::OneShot);
    if all_one_shot {
        tokio::select! {
            _ = join_all(started.iter().map(|f| f.wait())) => {
                info!("all one-shot fetchers finished");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
            }
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("received Ctrl-C, shutting down");
    }

    for fetcher in &started {
        fetcher.stop();
    }
    join_all(started.iter().map(|f| f.wait())).await;

    if let Some(db) = database {
        db.disconnect().await;
    }
    info!("gleaner exited cleanly");
    Ok(())
}
