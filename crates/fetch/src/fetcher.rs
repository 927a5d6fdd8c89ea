//! The fetcher capability and its implementations.

use std::sync::Arc;

use async_trait::async_trait;

use gleaner_core::FetchJob;

use crate::announce::CycleListener;
use crate::context::EngineContext;
use crate::cycle::CycleOutcome;
use crate::error::FetchError;
use crate::protocol::RedditCliProtocol;
use crate::scheduler::{CycleScheduler, SchedulerState};

/// A scheduled source of records for one job.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Registry tag this fetcher was built under.
    fn fetcher_type(&self) -> &'static str;

    fn job(&self) -> &FetchJob;

    fn subscribe(&self, listener: CycleListener);

    fn start(&self) -> Result<(), FetchError>;

    fn stop(&self);

    async fn run_one_cycle(&self) -> CycleOutcome;

    /// Resolve once the fetcher has stopped.
    async fn wait(&self);

    fn is_running(&self) -> bool;

    fn state(&self) -> SchedulerState;
}

// ── reddit CLI ──────────────────────────────────────────────────────

/// Harvests posts by running the `reddit` CLI.
pub struct RedditCliFetcher {
    scheduler: Arc<CycleScheduler>,
}

impl RedditCliFetcher {
    pub const TYPE: &'static str = "reddit-cli";

    pub fn new(job: FetchJob, ctx: EngineContext) -> Self {
        Self {
            scheduler: Arc::new(CycleScheduler::new(job, Arc::new(RedditCliProtocol), ctx)),
        }
    }

    pub fn factory(job: FetchJob, ctx: EngineContext) -> Arc<dyn Fetcher> {
        Arc::new(Self::new(job, ctx))
    }
}

#[async_trait]
impl Fetcher for RedditCliFetcher {
    fn fetcher_type(&self) -> &'static str {
        Self::TYPE
    }

    fn job(&self) -> &FetchJob {
        self.scheduler.job()
    }

    fn subscribe(&self, listener: CycleListener) {
        self.scheduler.subscribe(listener);
    }

    fn start(&self) -> Result<(), FetchError> {
        self.scheduler.start()
    }

    fn stop(&self) {
        self.scheduler.stop();
    }

    async fn run_one_cycle(&self) -> CycleOutcome {
        self.scheduler.run_one_cycle().await
    }

    async fn wait(&self) {
        self.scheduler.wait().await;
    }

    fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }
}
