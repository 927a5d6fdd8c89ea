use thiserror::Error;

use gleaner_core::Timestamp;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("watermark for {job_key} would regress: stored {current}, proposed {proposed}")]
    WatermarkRegression {
        job_key: String,
        current: Timestamp,
        proposed: Timestamp,
    },

    #[error("bulk write partially failed: {written} written, {failed} failed (first error: {first_error})")]
    PartialWrite {
        written: usize,
        failed: usize,
        first_error: String,
    },

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}
