//! Per-job cycle scheduling.
//!
//! A [`CycleScheduler`] owns one job and drives it through
//! `Idle → Scheduled → Running → (Scheduled | Stopped)`. One-shot jobs run a
//! single cycle and stop; poll jobs run, announce the next run time, wait,
//! and run again until stopped. Cycles of the same job never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gleaner_core::{FetchJob, FetchMode};

use crate::announce::{CycleAnnouncement, CycleListener, Listeners};
use crate::backoff::time_after;
use crate::context::EngineContext;
use crate::cycle::{run_cycle, CycleOutcome};
use crate::error::FetchError;
use crate::protocol::SourceProtocol;
use crate::shutdown::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled { at: DateTime<Utc> },
    Running,
    Stopped,
}

pub struct CycleScheduler {
    job: FetchJob,
    protocol: Arc<dyn SourceProtocol>,
    ctx: EngineContext,
    listeners: Listeners,
    stop: StopSignal,
    state: Mutex<SchedulerState>,
    started: AtomicBool,
    cycle_lock: tokio::sync::Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CycleScheduler {
    pub fn new(job: FetchJob, protocol: Arc<dyn SourceProtocol>, ctx: EngineContext) -> Self {
        Self {
            job,
            protocol,
            ctx,
            listeners: Listeners::new(),
            stop: StopSignal::new(),
            state: Mutex::new(SchedulerState::Idle),
            started: AtomicBool::new(false),
            cycle_lock: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
        }
    }

    pub fn job(&self) -> &FetchJob {
        &self.job
    }

    pub fn subscribe(&self, listener: CycleListener) {
        self.listeners.subscribe(listener);
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// True from `start` until the job stops.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
            && !self.stop.is_stopped()
            && self.state() != SchedulerState::Stopped
    }

    /// Spawn the scheduling loop. Fails if the job was already started.
    pub fn start(self: &Arc<Self>) -> Result<(), FetchError> {
        if self.started.swap(true, Ordering::SeqCst) || self.stop.is_stopped() {
            return Err(FetchError::AlreadyStarted(self.job.short_key().to_string()));
        }

        info!(
            job_key = %self.job.short_key(),
            campaign = %self.job.campaign_id,
            mode = ?self.job.mode,
            program = %self.job.invocation,
            "starting fetcher"
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop the job. Pending waits end immediately; a cycle already running
    /// finishes its current page and schedules nothing further.
    pub fn stop(&self) {
        if !self.stop.is_stopped() {
            info!(job_key = %self.job.short_key(), "stopping fetcher");
        }
        self.stop.stop();
        if self.state() != SchedulerState::Running {
            self.set_state(SchedulerState::Stopped);
        }
    }

    /// Wait for the scheduling loop to exit.
    pub async fn wait(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(job_key = %self.job.short_key(), error = %e, "fetcher task ended abnormally");
            }
        }
    }

    /// Run one cycle now and announce it.
    pub async fn run_one_cycle(&self) -> CycleOutcome {
        self.cycle().await.0
    }

    async fn cycle(&self) -> (CycleOutcome, Option<DateTime<Utc>>) {
        let _guard = self.cycle_lock.lock().await;
        self.set_state(SchedulerState::Running);

        let outcome = run_cycle(&self.job, self.protocol.as_ref(), &self.ctx, &self.stop).await;
        let next_run_at = self.next_run_at(&outcome);

        self.set_state(match next_run_at {
            Some(at) => SchedulerState::Scheduled { at },
            None if self.job.mode == FetchMode::OneShot || self.stop.is_stopped() => {
                SchedulerState::Stopped
            }
            None => SchedulerState::Idle,
        });

        self.listeners.announce(&CycleAnnouncement {
            job_key: self.job.key.clone(),
            campaign_id: self.job.campaign_id.clone(),
            next_run_at,
            message: outcome.describe(),
            outcome: outcome.clone(),
        });

        (outcome, next_run_at)
    }

    /// Poll jobs under a live loop run again after the poll interval, or at
    /// the rate-limit resume time when that is later.
    fn next_run_at(&self, outcome: &CycleOutcome) -> Option<DateTime<Utc>> {
        let looping = self.started.load(Ordering::SeqCst) && !self.stop.is_stopped();
        if self.job.mode != FetchMode::Poll || !looping {
            return None;
        }
        let next = time_after(Utc::now(), self.job.timing.poll_interval);
        Some(match outcome.resume_at() {
            Some(resume_at) if resume_at > next => resume_at,
            _ => next,
        })
    }

    async fn run_loop(self: Arc<Self>) {
        let initial = initial_wait(&self.job);
        if !initial.is_zero() {
            let at = time_after(Utc::now(), initial);
            self.set_state(SchedulerState::Scheduled { at });
            debug!(job_key = %self.job.short_key(), wait_secs = initial.as_secs(), "waiting for first cycle");
            if !self.stop.sleep(initial).await {
                self.finish();
                return;
            }
        }

        loop {
            if self.stop.is_stopped() {
                break;
            }
            let (_, next_run_at) = self.cycle().await;
            let Some(at) = next_run_at else { break };

            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if !self.stop.sleep(wait).await {
                break;
            }
        }

        self.finish();
    }

    fn finish(&self) {
        self.set_state(SchedulerState::Stopped);
        debug!(job_key = %self.job.short_key(), "fetcher loop exited");
    }
}

/// Wait before the first cycle: the start delay, plus one poll interval for
/// poll jobs that do not start immediately.
pub fn initial_wait(job: &FetchJob) -> Duration {
    let timing = &job.timing;
    match job.mode {
        FetchMode::Poll if !timing.start_immediately => {
            timing.start_delay.saturating_add(timing.poll_interval)
        }
        _ => timing.start_delay,
    }
}
