//! Cycle-completion announcements.
//!
//! Every cycle ends with exactly one [`CycleAnnouncement`], delivered
//! synchronously to each subscribed listener in subscription order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cycle::CycleOutcome;

#[derive(Debug, Clone)]
pub struct CycleAnnouncement {
    pub job_key: String,
    pub campaign_id: String,
    /// When the next cycle will start; `None` when the job is finished.
    pub next_run_at: Option<DateTime<Utc>>,
    pub message: String,
    pub outcome: CycleOutcome,
}

pub type CycleListener = Arc<dyn Fn(&CycleAnnouncement) + Send + Sync>;

#[derive(Default)]
pub struct Listeners {
    inner: RwLock<Vec<CycleListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: CycleListener) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Deliver `announcement` to every listener. A panicking listener is
    /// logged and does not stop delivery to the rest.
    pub fn announce(&self, announcement: &CycleAnnouncement) {
        let listeners: Vec<CycleListener> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(announcement))).is_err() {
                warn!(job_key = %announcement.job_key, "cycle listener panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Listener that writes each announcement to the log.
pub fn log_announcement(a: &CycleAnnouncement) {
    let key = &a.job_key[..a.job_key.len().min(12)];
    match a.next_run_at {
        Some(at) => info!(
            job_key = %key,
            campaign = %a.campaign_id,
            next_run_at = %at.to_rfc3339(),
            "{}",
            a.message
        ),
        None => info!(
            job_key = %key,
            campaign = %a.campaign_id,
            "{} (finished)",
            a.message
        ),
    }
}
