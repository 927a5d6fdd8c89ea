//! One fetch cycle: read watermark, page, persist, advance.
//!
//! [`run_cycle`] never returns an error. Every failure is folded into a
//! [`CycleOutcome`] so the scheduler can announce it and carry on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use gleaner_core::{FetchJob, Timestamp};
use gleaner_storage::StoreError;

use crate::context::EngineContext;
use crate::paginator::{PageRun, Paginator, StopReason};
use crate::protocol::SourceProtocol;
use crate::shutdown::StopSignal;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// New records were written and the watermark advanced to `watermark`.
    Persisted {
        inserted: usize,
        replaced: usize,
        watermark: Timestamp,
        pages: u32,
        stop_reason: StopReason,
    },
    /// Nothing newer than the watermark came back.
    NoNewData {
        pages: u32,
        stop_reason: StopReason,
        failure: Option<String>,
    },
    /// The source asked for a pause; nothing was persisted.
    RateLimited {
        resume_at: DateTime<Utc>,
        wait: Duration,
    },
    /// Reading the watermark or writing the batch failed. In-memory progress
    /// is dropped; the next cycle starts again from the stored watermark.
    PersistenceFailed { error: String },
}

impl CycleOutcome {
    /// Earliest time the next cycle may start, if the source imposed one.
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CycleOutcome::RateLimited { resume_at, .. } => Some(*resume_at),
            _ => None,
        }
    }

    /// One-line human summary, used as the announcement message.
    pub fn describe(&self) -> String {
        match self {
            CycleOutcome::Persisted {
                inserted,
                replaced,
                watermark,
                pages,
                ..
            } => format!(
                "persisted {} records ({} new, {} replaced) from {} page(s); watermark now {}",
                inserted + replaced,
                inserted,
                replaced,
                pages,
                watermark
            ),
            CycleOutcome::NoNewData {
                pages,
                failure: Some(reason),
                ..
            } => format!("no new data after {} page(s); gave up on a page: {}", pages, reason),
            CycleOutcome::NoNewData { pages, .. } => {
                format!("no new data after {} page(s)", pages)
            }
            CycleOutcome::RateLimited { resume_at, wait } => format!(
                "rate limited; pausing {}s until {}",
                wait.as_secs(),
                resume_at.to_rfc3339()
            ),
            CycleOutcome::PersistenceFailed { error } => {
                format!("persistence failed: {}", error)
            }
        }
    }
}

/// Run one cycle of `job`.
pub async fn run_cycle(
    job: &FetchJob,
    protocol: &dyn SourceProtocol,
    ctx: &EngineContext,
    stop: &StopSignal,
) -> CycleOutcome {
    let cycle_id = Uuid::new_v4();
    let job_key = job.short_key();

    let watermark = match ctx.watermarks.get(&job.key).await {
        Ok(w) => w.map(|w| w.last_seen).unwrap_or(0),
        Err(e) => {
            error!(%cycle_id, job_key = %job_key, error = %e, "failed to read watermark");
            return CycleOutcome::PersistenceFailed {
                error: format!("reading watermark: {}", e),
            };
        }
    };

    info!(
        %cycle_id,
        job_key = %job_key,
        campaign = %job.campaign_id,
        watermark,
        "cycle started"
    );

    let harvest = match Paginator::new(job, ctx.invoker.as_ref(), protocol, stop)
        .run(watermark)
        .await
    {
        PageRun::Harvested(h) => h,
        PageRun::RateLimited { resume_at, wait, .. } => {
            return CycleOutcome::RateLimited { resume_at, wait };
        }
    };

    let candidate = match harvest.candidate {
        Some(c) if !harvest.records.is_empty() => c,
        _ => {
            info!(
                %cycle_id,
                job_key = %job_key,
                pages = harvest.pages,
                received = harvest.received,
                "no records newer than watermark"
            );
            return CycleOutcome::NoNewData {
                pages: harvest.pages,
                stop_reason: harvest.stop_reason,
                failure: harvest.failure,
            };
        }
    };

    let report = match ctx.sink.upsert(&job.source_table, &harvest.records).await {
        Ok(r) => r,
        Err(e) => {
            error!(
                %cycle_id,
                job_key = %job_key,
                table = %job.source_table,
                records = harvest.records.len(),
                error = %e,
                "sink write failed, watermark left unchanged"
            );
            return CycleOutcome::PersistenceFailed {
                error: e.to_string(),
            };
        }
    };

    let watermark = match ctx.watermarks.set(&job.key, candidate).await {
        Ok(w) => w.last_seen,
        Err(StoreError::WatermarkRegression { current, .. }) => {
            // Another writer got there first; the batch is stored either way.
            warn!(
                %cycle_id,
                job_key = %job_key,
                stored = current,
                candidate,
                "watermark already at or past candidate"
            );
            current
        }
        Err(e) => {
            error!(%cycle_id, job_key = %job_key, error = %e, "failed to advance watermark");
            return CycleOutcome::PersistenceFailed {
                error: format!("advancing watermark: {}", e),
            };
        }
    };

    info!(
        %cycle_id,
        job_key = %job_key,
        table = %job.source_table,
        inserted = report.inserted,
        replaced = report.replaced,
        pages = harvest.pages,
        watermark,
        "cycle persisted"
    );

    CycleOutcome::Persisted {
        inserted: report.inserted,
        replaced: report.replaced,
        watermark,
        pages: harvest.pages,
        stop_reason: harvest.stop_reason,
    }
}
