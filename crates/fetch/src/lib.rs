//! The incremental fetch-cycle engine.
//!
//! Each [`FetchJob`](gleaner_core::FetchJob) gets a [`Fetcher`] whose
//! [`CycleScheduler`] runs cycles on its own tokio task. A cycle reads the
//! job's watermark, pages through the source with the [`Paginator`], writes
//! anything newer to the sink and advances the watermark.

pub mod announce;
pub mod backoff;
pub mod context;
pub mod cycle;
pub mod error;
pub mod fetcher;
pub mod invoker;
pub mod paginator;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use announce::{log_announcement, CycleAnnouncement, CycleListener, Listeners};
pub use context::EngineContext;
pub use cycle::{run_cycle, CycleOutcome};
pub use error::{FetchError, InvokeError};
pub use fetcher::{Fetcher, RedditCliFetcher};
pub use invoker::{CommandInvoker, InvokeOutput, Invoker};
pub use paginator::{Harvest, PageRun, Paginator, StopReason};
pub use protocol::{Page, ParseError, RedditCliProtocol, SourceProtocol};
pub use registry::{FetcherFactory, FetcherRegistry};
pub use scheduler::{CycleScheduler, SchedulerState};
pub use shutdown::StopSignal;
