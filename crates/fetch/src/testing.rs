//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use gleaner_core::{FetchJob, FetchMode, Invocation, Paging, RetryPolicy, Timestamp, Timing};

use crate::error::InvokeError;
use crate::invoker::{InvokeOutput, Invoker};

/// Replays queued outputs and records every argument list it was called with.
/// Once the script runs out it answers with an empty listing.
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<InvokeOutput, String>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, output: InvokeOutput) -> &Self {
        self.script.lock().unwrap().push_back(Ok(output));
        self
    }

    pub fn push_page(&self, items: &[(&str, Timestamp)], after: Option<&str>) -> &Self {
        self.push(InvokeOutput::ok(listing(items, after)))
    }

    pub fn push_failure(&self, stderr: &str) -> &Self {
        self.push(InvokeOutput {
            stderr: stderr.to_string(),
            exit_code: Some(1),
            ..InvokeOutput::default()
        })
    }

    pub fn push_rate_limit(&self, retry_after: Option<Duration>) -> &Self {
        self.push(InvokeOutput {
            stderr: "429 Too Many Requests".to_string(),
            exit_code: Some(1),
            rate_limited: true,
            retry_after,
            ..InvokeOutput::default()
        })
    }

    pub fn push_spawn_error(&self, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, program: &str, args: &[String]) -> Result<InvokeOutput, InvokeError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(InvokeError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            }),
            None => Ok(InvokeOutput::ok(listing(&[], None))),
        }
    }
}

/// A `reddit list` style listing with the given `(id, created_utc)` items.
pub fn listing(items: &[(&str, Timestamp)], after: Option<&str>) -> String {
    let posts: Vec<_> = items
        .iter()
        .map(|(id, created)| {
            json!({
                "id": id,
                "created_utc": created,
                "subreddit": "forhire",
                "title": format!("post {id}"),
            })
        })
        .collect();
    json!({ "posts": posts, "after": after }).to_string()
}

pub fn retry_fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        max_attempts,
        jitter: 0.0,
    }
}

pub fn paged_job(page_size: u32, max_pages: u32, until_watermark: bool) -> FetchJob {
    FetchJob::builder(
        "forhire",
        Invocation::new("reddit", vec!["list".into(), "--subreddit".into(), "forhire".into()]),
    )
    .paging(Paging {
        page_size,
        max_pages,
        inter_page_delay: Duration::from_millis(500),
        until_watermark,
    })
    .retry(retry_fast(3))
    .build()
    .unwrap()
}

pub fn poll_job(interval: Duration) -> FetchJob {
    FetchJob::builder(
        "forhire",
        Invocation::new("reddit", vec!["list".into()]),
    )
    .timing(Timing {
        poll_interval: interval,
        start_delay: Duration::ZERO,
        start_immediately: true,
    })
    .retry(retry_fast(1))
    .build()
    .unwrap()
}

pub fn one_shot_job() -> FetchJob {
    FetchJob::builder(
        "forhire",
        Invocation::new("reddit", vec!["list".into()]),
    )
    .mode(FetchMode::OneShot)
    .retry(retry_fast(1))
    .build()
    .unwrap()
}
