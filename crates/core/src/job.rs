//! Fetch job definitions.
//!
//! A [`FetchJob`] is one independently scheduled source of records. It is
//! built once at startup (usually from a campaign manifest, see
//! [`crate::manifest`]) and shared immutably for the lifetime of the process.
//! Every job carries a stable [`FetchJob::key`] that indexes its watermark.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GleanerError;

// ── Mode ────────────────────────────────────────────────────────────

/// Whether a job runs once or repeats on a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchMode {
    #[default]
    #[serde(rename = "poll")]
    Poll,
    #[serde(rename = "one-shot")]
    OneShot,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Poll => write!(f, "poll"),
            FetchMode::OneShot => write!(f, "one-shot"),
        }
    }
}

// ── Invocation ──────────────────────────────────────────────────────

/// A single external command: program plus its base argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Whether any of `flags` appears among the arguments, either as its own
    /// token (`--limit 5`) or in `--flag=value` form.
    pub fn has_any_flag(&self, flags: &[&str]) -> bool {
        self.args.iter().any(|arg| {
            flags.iter().any(|flag| {
                arg == flag
                    || arg
                        .strip_prefix(flag)
                        .is_some_and(|rest| rest.starts_with('='))
            })
        })
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// ── Parameters ──────────────────────────────────────────────────────

/// Upper bound on any configured wait, keeping scheduled times representable.
pub const MAX_SCHEDULE_SPAN: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// When cycles run.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub start_delay: Duration,
    pub start_immediately: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            start_delay: Duration::ZERO,
            start_immediately: true,
        }
    }
}

/// How one cycle pages through the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Paging {
    pub page_size: u32,
    pub max_pages: u32,
    pub inter_page_delay: Duration,
    /// Keep requesting pages until a page reaches already-seen data.
    pub until_watermark: bool,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page_size: 25,
            max_pages: 1,
            inter_page_delay: Duration::from_millis(1000),
            until_watermark: false,
        }
    }
}

/// Exponential backoff parameters shared by page retries and rate-limit pauses.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Symmetric jitter as a fraction of the computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            max_attempts: 3,
            jitter: 0.2,
        }
    }
}

// ── Job ─────────────────────────────────────────────────────────────

/// One logical, independently scheduled fetch source.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Deterministic identity, see [`job_key`].
    pub key: String,
    /// Campaign (source) this job belongs to.
    pub campaign_id: String,
    /// Registry tag selecting the fetcher implementation.
    pub fetcher_type: String,
    /// Destination table for persisted records.
    pub source_table: String,
    pub invocation: Invocation,
    pub mode: FetchMode,
    pub timing: Timing,
    pub paging: Paging,
    pub retry: RetryPolicy,
}

impl FetchJob {
    pub fn builder(campaign_id: impl Into<String>, invocation: Invocation) -> FetchJobBuilder {
        FetchJobBuilder {
            campaign_id: campaign_id.into(),
            invocation,
            fetcher_type: "reddit-cli".to_string(),
            source_table: "reddit".to_string(),
            mode: FetchMode::default(),
            timing: Timing::default(),
            paging: Paging::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// First 12 hex chars of the key, for log lines.
    pub fn short_key(&self) -> &str {
        &self.key[..self.key.len().min(12)]
    }
}

/// Collects job parameters; [`build`](FetchJobBuilder::build) validates them
/// and derives the job key.
#[derive(Debug, Clone)]
pub struct FetchJobBuilder {
    campaign_id: String,
    invocation: Invocation,
    fetcher_type: String,
    source_table: String,
    mode: FetchMode,
    timing: Timing,
    paging: Paging,
    retry: RetryPolicy,
}

impl FetchJobBuilder {
    pub fn fetcher_type(mut self, fetcher_type: impl Into<String>) -> Self {
        self.fetcher_type = fetcher_type.into();
        self
    }

    pub fn source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table = table.into();
        self
    }

    pub fn mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<FetchJob, GleanerError> {
        let label = format!("{}: {}", self.campaign_id, self.invocation);
        let fail = |msg: &str| Err(GleanerError::invalid_job(label.clone(), msg));

        if self.invocation.program.trim().is_empty() {
            return fail("program must not be empty");
        }
        if self.mode == FetchMode::Poll && self.timing.poll_interval.is_zero() {
            return fail("poll interval must be greater than zero");
        }
        if self.timing.poll_interval > MAX_SCHEDULE_SPAN
            || self.timing.start_delay > MAX_SCHEDULE_SPAN
            || self.paging.inter_page_delay > MAX_SCHEDULE_SPAN
        {
            return fail("poll interval, start delay and page delay must not exceed ten years");
        }
        if self.paging.page_size == 0 {
            return fail("page size must be greater than zero");
        }
        if self.paging.max_pages == 0 {
            return fail("max pages per cycle must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry max attempts must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return fail("retry jitter must be within [0, 1]");
        }
        if self.retry.base_delay > self.retry.max_delay {
            return fail("retry base delay exceeds max delay");
        }
        if !is_valid_table_name(&self.source_table) {
            return fail("source table must match [A-Za-z_][A-Za-z0-9_]*");
        }

        Ok(FetchJob {
            key: job_key(&self.campaign_id, &self.invocation),
            campaign_id: self.campaign_id,
            fetcher_type: self.fetcher_type,
            source_table: self.source_table,
            invocation: self.invocation,
            mode: self.mode,
            timing: self.timing,
            paging: self.paging,
            retry: self.retry,
        })
    }
}

/// Derive the stable key for a job: SHA-256 hex of the campaign id, program
/// and argument list, serialized as a JSON array so that no two distinct
/// inputs share an encoding.
pub fn job_key(campaign_id: &str, invocation: &Invocation) -> String {
    let canonical = serde_json::json!([campaign_id, invocation.program, invocation.args]);
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("{digest:x}")
}

/// Whether `name` is safe to interpolate as a SQL identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
