//! Explicit PostgreSQL handle.
//!
//! The process builds one [`Database`] at startup, hands its stores to the
//! fetchers, and calls [`Database::disconnect`] on shutdown. There is no
//! global connection.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use gleaner_core::config::PostgresConfig;

use crate::error::StoreError;
use crate::sink::PgSink;
use crate::watermark::PgWatermarkStore;

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");

        Ok(Self { pool })
    }

    pub fn watermarks(&self) -> PgWatermarkStore {
        PgWatermarkStore::new(self.pool.clone())
    }

    pub fn sink(&self) -> PgSink {
        PgSink::new(self.pool.clone())
    }

    /// Close every pooled connection. Stores created from this handle stop
    /// working afterwards.
    pub async fn disconnect(self) {
        self.pool.close().await;
        info!("PostgreSQL disconnected");
    }
}
