use std::time::Duration;

use thiserror::Error;

/// Failure to run the external command at all.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no fetcher registered for type '{0}'")]
    UnknownFetcherType(String),

    #[error("fetcher for job {0} is already started")]
    AlreadyStarted(String),
}
