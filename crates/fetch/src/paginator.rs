//! Paginated retrieval for one fetch cycle.
//!
//! [`Paginator::run`] pulls pages in order, each built from the previous
//! page's continuation token, until a stop condition fires or the page cap is
//! reached. Malformed output and failed runs are retried on the same page with
//! backoff; a rate-limit signal abandons the whole cycle. Whatever was
//! gathered is finally deduplicated by id and filtered against the watermark
//! read at cycle start.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use gleaner_core::record::{dedup_by_id, max_created, newer_than};
use gleaner_core::{FetchJob, Record, Timestamp};

use crate::backoff::{backoff_delay, rate_limit_wait, time_after};
use crate::invoker::Invoker;
use crate::protocol::{Page, SourceProtocol};
use crate::shutdown::StopSignal;

/// Why paging ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job fetches a single page per cycle.
    SinglePage,
    /// A page reached a record at or below the watermark.
    CaughtUp,
    /// The source returned no continuation token.
    Exhausted,
    /// `max_pages` pages were fetched without another stop condition firing.
    PageCap,
    /// A page failed `max_attempts` times; earlier pages are kept.
    RetriesExhausted,
    /// The job was stopped between pages.
    Stopped,
}

/// Records gathered by a cycle that was not rate limited.
#[derive(Debug, Clone)]
pub struct Harvest {
    /// Records strictly newer than the starting watermark.
    pub records: Vec<Record>,
    /// Newest creation time among `records`.
    pub candidate: Option<Timestamp>,
    pub pages: u32,
    /// Records received before deduplication and the watermark filter.
    pub received: usize,
    pub stop_reason: StopReason,
    /// Last error of the page that exhausted its retries.
    pub failure: Option<String>,
}

/// Result of [`Paginator::run`].
#[derive(Debug, Clone)]
pub enum PageRun {
    Harvested(Harvest),
    /// The source asked us to pause; nothing from this cycle may be persisted.
    RateLimited {
        resume_at: DateTime<Utc>,
        wait: Duration,
        pages: u32,
    },
}

enum PageAttempt {
    Page(Page),
    RateLimited(Duration),
    GaveUp(String),
    Stopped,
}

pub struct Paginator<'a> {
    job: &'a FetchJob,
    invoker: &'a dyn Invoker,
    protocol: &'a dyn SourceProtocol,
    stop: &'a StopSignal,
}

impl<'a> Paginator<'a> {
    pub fn new(
        job: &'a FetchJob,
        invoker: &'a dyn Invoker,
        protocol: &'a dyn SourceProtocol,
        stop: &'a StopSignal,
    ) -> Self {
        Self {
            job,
            invoker,
            protocol,
            stop,
        }
    }

    /// Page through the source for one cycle against `watermark`.
    pub async fn run(&self, watermark: Timestamp) -> PageRun {
        let paging = &self.job.paging;
        let mut accumulated: Vec<Record> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        let mut failure = None;

        let stop_reason = loop {
            if pages >= paging.max_pages {
                break StopReason::PageCap;
            }
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }

            let args = self
                .protocol
                .page_args(&self.job.invocation, paging.page_size, token.as_deref());

            let page = match self.fetch_page(&args).await {
                PageAttempt::Page(page) => page,
                PageAttempt::RateLimited(wait) => {
                    let resume_at = time_after(Utc::now(), wait);
                    warn!(
                        job_key = %self.job.short_key(),
                        page = pages + 1,
                        wait_secs = wait.as_secs(),
                        "rate limited, abandoning cycle"
                    );
                    return PageRun::RateLimited {
                        resume_at,
                        wait,
                        pages,
                    };
                }
                PageAttempt::GaveUp(reason) => {
                    failure = Some(reason);
                    break StopReason::RetriesExhausted;
                }
                PageAttempt::Stopped => break StopReason::Stopped,
            };

            pages += 1;
            let page_len = page.records.len();
            let caught_up = page.records.iter().any(|r| r.created <= watermark);
            accumulated.extend(page.records);
            token = page.next_token;

            debug!(
                job_key = %self.job.short_key(),
                page = pages,
                records = page_len,
                has_token = token.is_some(),
                "fetched page"
            );

            if !paging.until_watermark {
                break StopReason::SinglePage;
            }
            if caught_up {
                break StopReason::CaughtUp;
            }
            // Without a token the next request would repeat the first page,
            // so a full page with no token ends paging as well.
            if token.is_none() {
                break StopReason::Exhausted;
            }
            if pages >= paging.max_pages {
                break StopReason::PageCap;
            }
            if !self.stop.sleep(paging.inter_page_delay).await {
                break StopReason::Stopped;
            }
        };

        if stop_reason == StopReason::PageCap {
            info!(
                job_key = %self.job.short_key(),
                max_pages = paging.max_pages,
                "page cap reached before catching up"
            );
        }

        let received = accumulated.len();
        let records = newer_than(dedup_by_id(accumulated), watermark);
        let candidate = max_created(&records);

        PageRun::Harvested(Harvest {
            records,
            candidate,
            pages,
            received,
            stop_reason,
            failure,
        })
    }

    /// Fetch one page, retrying failures with backoff.
    async fn fetch_page(&self, args: &[String]) -> PageAttempt {
        let retry = &self.job.retry;
        let program = self.job.invocation.program.as_str();
        let mut attempt = 0u32;

        loop {
            let error = match self.invoker.invoke(program, args).await {
                Ok(out) if out.rate_limited => {
                    return PageAttempt::RateLimited(rate_limit_wait(
                        retry,
                        out.retry_after,
                        attempt,
                    ));
                }
                Ok(out) if !out.success => match out.exit_code {
                    Some(code) => format!("exited with status {}: {}", code, out.stderr_summary()),
                    None => format!("terminated by signal: {}", out.stderr_summary()),
                },
                Ok(out) => match self.protocol.parse_page(&out.stdout) {
                    Ok(page) => return PageAttempt::Page(page),
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt >= retry.max_attempts {
                warn!(
                    job_key = %self.job.short_key(),
                    attempts = attempt,
                    error = %error,
                    "page failed, giving up on remaining pages"
                );
                return PageAttempt::GaveUp(error);
            }

            let delay = backoff_delay(retry, attempt - 1);
            warn!(
                job_key = %self.job.short_key(),
                attempt = attempt,
                max_attempts = retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "page fetch failed, retrying"
            );
            if !self.stop.sleep(delay).await {
                return PageAttempt::Stopped;
            }
        }
    }
}
