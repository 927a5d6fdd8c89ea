//! Persistence for the fetch engine: per-job watermarks and the idempotent
//! record sink, each with an in-memory and a PostgreSQL implementation.

pub mod db;
pub mod error;
pub mod sink;
pub mod watermark;

pub use db::Database;
pub use error::StoreError;
pub use sink::{MemorySink, PgSink, RecordSink, SinkReport, StoredPost};
pub use watermark::{MemoryWatermarkStore, PgWatermarkStore, Watermark, WatermarkStore};
