//! Project record store — one row per wallet, atomic upserts.
//!
//! The record tracks the links produced by the upload pipeline.  Upserts are
//! a single `INSERT ... ON CONFLICT DO UPDATE` with column-wise `COALESCE`
//! merge, so two uploads finishing near-simultaneously each keep their own
//! link instead of the last writer clobbering the other.

use std::str::FromStr;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{AgentError, Result};
use crate::session::WalletAddress;

/// Establish a SQLite connection pool and run pending migrations.  The
/// database file is created on first run if it doesn't exist yet.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// The single per-wallet row tracking uploaded asset links and status.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub wallet_address: String,
    pub pitch_deck_link: Option<String>,
    pub funds_list_link: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProjectRecord {
    /// Both required links present — the record is ready for processing.
    pub fn is_complete(&self) -> bool {
        self.pitch_deck_link.is_some() && self.funds_list_link.is_some()
    }
}

/// Fields to merge into a record.  `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub pitch_deck_link: Option<String>,
    pub funds_list_link: Option<String>,
}

impl ProjectPatch {
    pub fn pitch_deck(url: impl Into<String>) -> Self {
        Self {
            pitch_deck_link: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn funds_list(url: impl Into<String>) -> Self {
        Self {
            funds_list_link: Some(url.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ProjectRecordStore {
    pool: SqlitePool,
}

impl ProjectRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert-or-merge the patch for a wallet in one statement and return
    /// the resulting row.  New rows start with `status = 'created'`.
    pub async fn upsert(
        &self,
        wallet: &WalletAddress,
        patch: &ProjectPatch,
    ) -> Result<ProjectRecord> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO projects
                (wallet_address, pitch_deck_link, funds_list_link, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'created', ?4, ?4)
            ON CONFLICT(wallet_address) DO UPDATE SET
                pitch_deck_link = COALESCE(excluded.pitch_deck_link, pitch_deck_link),
                funds_list_link = COALESCE(excluded.funds_list_link, funds_list_link),
                updated_at      = excluded.updated_at
            "#,
        )
        .bind(wallet.as_str())
        .bind(&patch.pitch_deck_link)
        .bind(&patch.funds_list_link)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(wallet).await?.ok_or_else(|| {
            AgentError::Database(sqlx::Error::RowNotFound)
        })
    }

    /// Fetch the record for a wallet.  Not-found is an expected outcome,
    /// returned as `Ok(None)`.
    pub async fn get(&self, wallet: &WalletAddress) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT wallet_address, pitch_deck_link, funds_list_link, status,
                   created_at, updated_at
            FROM   projects
            WHERE  wallet_address = ?1
            "#,
        )
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
