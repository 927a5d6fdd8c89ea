use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GleanerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("invalid fetch job '{job}': {message}")]
    InvalidJob { job: String, message: String },
}

impl GleanerError {
    pub fn invalid_job(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidJob {
            job: job.into(),
            message: message.into(),
        }
    }
}
