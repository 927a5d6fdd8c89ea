//! Idempotent record persistence.
//!
//! Records are keyed by their external identity. Writing an identity that is
//! already stored replaces the stored row (last write wins); it never creates
//! a second row. [`SinkReport`] separates fresh inserts from replacements for
//! logging only.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};

use gleaner_core::job::is_valid_table_name;
use gleaner_core::Record;

use crate::error::StoreError;

/// Concurrent row writes per bulk upsert.
const WRITE_CONCURRENCY: usize = 8;

/// Outcome of a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub inserted: usize,
    pub replaced: usize,
}

impl SinkReport {
    pub fn total(&self) -> usize {
        self.inserted + self.replaced
    }
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Upsert `records` into `table`, keyed by [`Record::id`].
    ///
    /// Writes are unordered. If some rows fail, the others are still written
    /// and the call returns [`StoreError::PartialWrite`].
    async fn upsert(&self, table: &str, records: &[Record]) -> Result<SinkReport, StoreError>;
}

// ── Normalized row ──────────────────────────────────────────────────

/// The stored form of a post: well-known fields lifted out of the payload,
/// the full payload kept in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: String,
    pub reddit_id: String,
    pub subreddit: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub num_comments: Option<i64>,
    pub permalink: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

impl StoredPost {
    pub fn from_record(record: &Record, fetched_at: DateTime<Utc>) -> Self {
        let raw = &record.payload;
        let text = |field: &str| {
            raw.get(field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let int = |field: &str| raw.get(field).and_then(|v| v.as_i64());

        Self {
            id: record.id.clone(),
            reddit_id: record.id.clone(),
            subreddit: text("subreddit"),
            title: text("title"),
            author: text("author"),
            created_at: DateTime::from_timestamp(record.created, 0),
            url: text("url"),
            score: int("score"),
            num_comments: int("num_comments"),
            permalink: text("permalink"),
            raw: raw.clone(),
            fetched_at,
        }
    }
}

fn check_table(table: &str) -> Result<(), StoreError> {
    if is_valid_table_name(table) {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Process-local sink, for tests and `--memory` runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RwLock<HashMap<String, HashMap<String, StoredPost>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.get(table).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn get(&self, table: &str, id: &str) -> Option<StoredPost> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(table).and_then(|rows| rows.get(id).cloned()))
    }

    /// Stored ids in `table`, sorted.
    pub fn ids(&self, table: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tables
            .read()
            .map(|t| t.get(table).map(|rows| rows.keys().cloned().collect()).unwrap_or_default())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(&self, table: &str, records: &[Record]) -> Result<SinkReport, StoreError> {
        check_table(table)?;
        let fetched_at = Utc::now();
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("sink tables"))?;
        let rows = tables.entry(table.to_string()).or_default();

        let mut report = SinkReport::default();
        for record in records {
            let post = StoredPost::from_record(record, fetched_at);
            match rows.insert(post.id.clone(), post) {
                Some(_) => report.replaced += 1,
                None => report.inserted += 1,
            }
        }
        Ok(report)
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────────

/// Tables already created by this process.
///
/// Creation runs while the lock is held, so first writes from several jobs
/// sharing a table issue one `CREATE TABLE` between them.
#[derive(Debug, Default)]
struct EnsuredTables(tokio::sync::Mutex<HashSet<String>>);

impl EnsuredTables {
    async fn ensure<F, Fut>(&self, table: &str, create: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let mut known = self.0.lock().await;
        if known.contains(table) {
            return Ok(());
        }
        create().await?;
        known.insert(table.to_string());
        Ok(())
    }
}

/// Posts stored one table per source, created on first use.
#[derive(Debug)]
pub struct PgSink {
    pool: PgPool,
    ensured: EnsuredTables,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ensured: EnsuredTables::default(),
        }
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        self.ensured
            .ensure(table, || self.create_table(table))
            .await
    }

    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 id           TEXT PRIMARY KEY,
                 reddit_id    TEXT NOT NULL,
                 subreddit    TEXT,
                 title        TEXT,
                 author       TEXT,
                 created_at   TIMESTAMPTZ,
                 url          TEXT,
                 score        BIGINT,
                 num_comments BIGINT,
                 permalink    TEXT,
                 raw          JSONB NOT NULL,
                 fetched_at   TIMESTAMPTZ NOT NULL
             )"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_subreddit_created_idx
                 ON {table} (subreddit, created_at DESC)"
        ))
        .execute(&self.pool)
        .await?;

        debug!(table = %table, "ensured sink table");
        Ok(())
    }

    /// Upsert one row; `Ok(true)` when the row did not exist before.
    async fn upsert_one(&self, sql: &str, post: StoredPost) -> Result<bool, sqlx::Error> {
        // xmax is zero only for a tuple this statement inserted fresh.
        sqlx::query_scalar::<_, bool>(sql)
            .bind(&post.id)
            .bind(&post.reddit_id)
            .bind(&post.subreddit)
            .bind(&post.title)
            .bind(&post.author)
            .bind(post.created_at)
            .bind(&post.url)
            .bind(post.score)
            .bind(post.num_comments)
            .bind(&post.permalink)
            .bind(&post.raw)
            .bind(post.fetched_at)
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl RecordSink for PgSink {
    async fn upsert(&self, table: &str, records: &[Record]) -> Result<SinkReport, StoreError> {
        check_table(table)?;
        if records.is_empty() {
            return Ok(SinkReport::default());
        }
        self.ensure_table(table).await?;

        let sql = format!(
            "INSERT INTO {table}
                 (id, reddit_id, subreddit, title, author, created_at, url,
                  score, num_comments, permalink, raw, fetched_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                 reddit_id = EXCLUDED.reddit_id,
                 subreddit = EXCLUDED.subreddit,
                 title = EXCLUDED.title,
                 author = EXCLUDED.author,
                 created_at = EXCLUDED.created_at,
                 url = EXCLUDED.url,
                 score = EXCLUDED.score,
                 num_comments = EXCLUDED.num_comments,
                 permalink = EXCLUDED.permalink,
                 raw = EXCLUDED.raw,
                 fetched_at = EXCLUDED.fetched_at
             RETURNING (xmax = 0) AS inserted"
        );

        let fetched_at = Utc::now();
        let posts: Vec<StoredPost> = records
            .iter()
            .map(|record| StoredPost::from_record(record, fetched_at))
            .collect();
        let results: Vec<Result<bool, sqlx::Error>> = stream::iter(posts)
            .map(|post| self.upsert_one(&sql, post))
            .buffer_unordered(WRITE_CONCURRENCY)
            .collect()
            .await;

        let mut report = SinkReport::default();
        let mut failed = 0usize;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.replaced += 1,
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Some(first_error) = first_error {
            warn!(table = %table, written = report.total(), failed, "bulk upsert partially failed");
            return Err(StoreError::PartialWrite {
                written: report.total(),
                failed,
                first_error,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(id: &str, created: i64, title: &str) -> Record {
        Record::new(
            id,
            created,
            json!({
                "id": id,
                "title": title,
                "subreddit": "forhire",
                "author": "someone",
                "created_utc": created,
                "score": 12,
                "num_comments": 3,
                "permalink": format!("/r/forhire/comments/{id}"),
            }),
        )
    }

    #[tokio::test]
    async fn upsert_counts_inserts_and_replacements() {
        let sink = MemorySink::new();
        let first = sink.upsert("reddit", &[post("a", 1, "t"), post("b", 2, "t")]).await.unwrap();
        assert_eq!(first, SinkReport { inserted: 2, replaced: 0 });

        let second = sink.upsert("reddit", &[post("b", 2, "t"), post("c", 3, "t")]).await.unwrap();
        assert_eq!(second, SinkReport { inserted: 1, replaced: 1 });
        assert_eq!(sink.len("reddit"), 3);
    }

    #[tokio::test]
    async fn same_identity_keeps_latest_payload() {
        let sink = MemorySink::new();
        sink.upsert("reddit", &[post("a", 1, "old title")]).await.unwrap();
        sink.upsert("reddit", &[post("a", 1, "new title")]).await.unwrap();

        assert_eq!(sink.len("reddit"), 1);
        let stored = sink.get("reddit", "a").unwrap();
        assert_eq!(stored.title.as_deref(), Some("new title"));
        assert_eq!(stored.raw["title"], "new title");
    }

    #[tokio::test]
    async fn tables_are_separate() {
        let sink = MemorySink::new();
        sink.upsert("reddit", &[post("a", 1, "t")]).await.unwrap();
        sink.upsert("jobs", &[post("a", 1, "t")]).await.unwrap();
        assert_eq!(sink.len("reddit"), 1);
        assert_eq!(sink.len("jobs"), 1);
        assert_eq!(sink.len("missing"), 0);
    }

    #[tokio::test]
    async fn invalid_table_is_rejected() {
        let sink = MemorySink::new();
        let err = sink.upsert("bad-name", &[post("a", 1, "t")]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_writes_create_a_table_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let ensured = EnsuredTables::default();
        let counter = AtomicUsize::new(0);
        let creates = &counter;
        let create = move || async move {
            creates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        };

        let (a, b) = tokio::join!(
            ensured.ensure("reddit", create),
            ensured.ensure("reddit", create)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(creates.load(Ordering::SeqCst), 1);

        ensured.ensure("jobs", create).await.unwrap();
        assert_eq!(creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_table_creation_is_retried() {
        let ensured = EnsuredTables::default();
        let err = ensured
            .ensure("reddit", || async { Err(StoreError::InvalidTable("reddit".into())) })
            .await;
        assert!(err.is_err());

        let created = std::sync::atomic::AtomicBool::new(false);
        let flag = &created;
        ensured
            .ensure("reddit", move || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert!(created.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn stored_post_normalizes_known_fields() {
        let fetched = Utc::now();
        let stored = StoredPost::from_record(&post("xyz", 1_700_000_000, "Hiring"), fetched);
        assert_eq!(stored.reddit_id, "xyz");
        assert_eq!(stored.subreddit.as_deref(), Some("forhire"));
        assert_eq!(stored.score, Some(12));
        assert_eq!(stored.num_comments, Some(3));
        assert_eq!(stored.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(stored.url, None);
        assert_eq!(stored.fetched_at, fetched);
    }
}
