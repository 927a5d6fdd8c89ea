pub mod config;
pub mod error;
pub mod job;
pub mod manifest;
pub mod record;

pub use config::Config;
pub use error::*;
pub use job::{FetchJob, FetchMode, Invocation, Paging, RetryPolicy, Timing};
pub use record::{Record, Timestamp};
