//! Running the external command.
//!
//! [`Invoker`] is the seam between the engine and the subprocess. The engine
//! only looks at the normalized [`InvokeOutput`]: did it succeed, and did the
//! source ask us to back off.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::InvokeError;

/// Captured result of one command run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    /// The source signalled a rate limit.
    pub rate_limited: bool,
    /// Pause the source asked for, if it named one.
    pub retry_after: Option<Duration>,
}

impl InvokeOutput {
    /// A clean exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// First non-empty stderr line, for log messages.
    pub fn stderr_summary(&self) -> &str {
        self.stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, program: &str, args: &[String]) -> Result<InvokeOutput, InvokeError>;
}

// ── Subprocess invoker ──────────────────────────────────────────────

/// Runs commands with `tokio::process`, capturing stdout and stderr.
#[derive(Debug, Clone, Default)]
pub struct CommandInvoker {
    timeout: Option<Duration>,
}

impl CommandInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and fail if it runs longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl Invoker for CommandInvoker {
    async fn invoke(&self, program: &str, args: &[String]) -> Result<InvokeOutput, InvokeError> {
        debug!(program = program, args = ?args, "running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, child.wait_with_output())
                .await
                .map_err(|_| InvokeError::Timeout {
                    program: program.to_string(),
                    after,
                })??,
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let success = output.status.success();

        // Only a failed run can carry a rate-limit signal; the CLI reports
        // these on stderr, occasionally on stdout.
        let signal = if success {
            RateLimitSignal::default()
        } else {
            detect_rate_limit(&stderr).or(detect_rate_limit(&stdout))
        };

        Ok(InvokeOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
            success,
            rate_limited: signal.limited,
            retry_after: signal.retry_after,
        })
    }
}

// ── Rate-limit detection ────────────────────────────────────────────

/// What the command output says about rate limiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub limited: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitSignal {
    fn or(self, other: RateLimitSignal) -> RateLimitSignal {
        if self.limited { self } else { other }
    }
}

const RATE_LIMIT_PHRASES: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "http 429",
    "status 429",
];

/// Scan command output for a rate-limit signal.
///
/// A `Retry-After: N` header (any case, `retryafter` also accepted) names the
/// pause in seconds; the phrases in [`RATE_LIMIT_PHRASES`] flag a rate limit
/// without one.
pub fn detect_rate_limit(text: &str) -> RateLimitSignal {
    let lower = text.to_ascii_lowercase();
    let retry_after = parse_retry_after(&lower);
    let limited = retry_after.is_some() || RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p));
    RateLimitSignal {
        limited,
        retry_after: retry_after.map(Duration::from_secs),
    }
}

fn parse_retry_after(lower: &str) -> Option<u64> {
    for marker in ["retry-after", "retryafter"] {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(marker) {
            let start = from + pos + marker.len();
            let rest = &lower[start..];
            let trimmed = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
            if trimmed.len() < rest.len() {
                let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(secs) = digits.parse() {
                    return Some(secs);
                }
            }
            from = start;
        }
    }
    None
}
