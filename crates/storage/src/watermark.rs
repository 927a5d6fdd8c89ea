//! Per-job watermark persistence.
//!
//! A watermark is the newest record creation time a job has durably
//! persisted. It only ever moves forward: [`WatermarkStore::set`] is a
//! compare-and-set that refuses any value not strictly greater than the one
//! stored, so monotonicity holds even if two writers race on the same key.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use gleaner_core::Timestamp;

use crate::error::StoreError;

/// Stored watermark for one job key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Watermark {
    pub last_seen: Timestamp,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark, or `None` if the job has never persisted anything.
    async fn get(&self, job_key: &str) -> Result<Option<Watermark>, StoreError>;

    /// Advance the watermark to `last_seen`.
    ///
    /// Fails with [`StoreError::WatermarkRegression`] when `last_seen` is not
    /// strictly greater than the stored value; the stored value is unchanged.
    async fn set(&self, job_key: &str, last_seen: Timestamp) -> Result<Watermark, StoreError>;
}

// ── In-memory ───────────────────────────────────────────────────────

/// Process-local watermark store, for tests and `--memory` runs.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    entries: RwLock<HashMap<String, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, job_key: &str) -> Result<Option<Watermark>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned("watermarks"))?;
        Ok(entries.get(job_key).copied())
    }

    async fn set(&self, job_key: &str, last_seen: Timestamp) -> Result<Watermark, StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::LockPoisoned("watermarks"))?;

        if let Some(current) = entries.get(job_key) {
            if last_seen <= current.last_seen {
                return Err(StoreError::WatermarkRegression {
                    job_key: job_key.to_string(),
                    current: current.last_seen,
                    proposed: last_seen,
                });
            }
        }

        let mark = Watermark {
            last_seen,
            updated_at: Utc::now(),
        };
        entries.insert(job_key.to_string(), mark);
        Ok(mark)
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────────

/// Watermarks in the `fetcher_state` table.
#[derive(Debug, Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn get(&self, job_key: &str) -> Result<Option<Watermark>, StoreError> {
        let row = sqlx::query_as::<_, Watermark>(
            "SELECT last_seen, updated_at FROM fetcher_state WHERE job_key = $1",
        )
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn set(&self, job_key: &str, last_seen: Timestamp) -> Result<Watermark, StoreError> {
        // The WHERE on the conflict branch makes this a compare-and-set: an
        // existing row is only touched when the new value is strictly greater.
        let row = sqlx::query_as::<_, Watermark>(
            "INSERT INTO fetcher_state (job_key, last_seen, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (job_key) DO UPDATE
                 SET last_seen = EXCLUDED.last_seen, updated_at = EXCLUDED.updated_at
                 WHERE fetcher_state.last_seen < EXCLUDED.last_seen
             RETURNING last_seen, updated_at",
        )
        .bind(job_key)
        .bind(last_seen)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(mark) => Ok(mark),
            None => {
                let current = self.get(job_key).await?.map(|m| m.last_seen).unwrap_or(last_seen);
                Err(StoreError::WatermarkRegression {
                    job_key: job_key.to_string(),
                    current,
                    proposed: last_seen,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_none() {
        let store = MemoryWatermarkStore::new();
        assert_eq!(store.get("job").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryWatermarkStore::new();
        store.set("job", 30).await.unwrap();
        assert_eq!(store.get("job").await.unwrap().unwrap().last_seen, 30);
    }

    #[tokio::test]
    async fn set_rejects_equal_and_lower_values() {
        let store = MemoryWatermarkStore::new();
        store.set("job", 30).await.unwrap();

        let equal = store.set("job", 30).await;
        assert!(matches!(
            equal,
            Err(StoreError::WatermarkRegression { current: 30, proposed: 30, .. })
        ));
        assert!(store.set("job", 10).await.is_err());
        assert_eq!(store.get("job").await.unwrap().unwrap().last_seen, 30);
    }

    #[tokio::test]
    async fn sequence_of_advances_is_monotonic() {
        let store = MemoryWatermarkStore::new();
        let mut previous = None;
        for candidate in [5, 3, 9, 9, 12, 1, 40] {
            let _ = store.set("job", candidate).await;
            let now = store.get("job").await.unwrap().map(|m| m.last_seen);
            assert!(now >= previous, "watermark went from {previous:?} to {now:?}");
            previous = now;
        }
        assert_eq!(previous, Some(40));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryWatermarkStore::new();
        store.set("a", 100).await.unwrap();
        store.set("b", 1).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().last_seen, 100);
        assert_eq!(store.get("b").await.unwrap().unwrap().last_seen, 1);
    }
}
