//! SQLite row store for self-hosted cloud storage.
//!
//! Holds the same `(owner_id, key, value)` rows as the hosted service, with the
//! value kept as JSON text.

use std::path::Path;
use async_trait::async_trait;
use clipdo_core::{codec, ChangeOp, Session};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use tracing::warn;
use super::{ChangeFeed, CloudRow, Result, RowStore, StorageError};

/// SQLite-backed [`RowStore`].
#[derive(Clone)]
pub struct SqliteRowStore {
    /// Database connection pool
    pool: sqlx::SqlitePool,
    table: String,
    feed: ChangeFeed,
}

impl SqliteRowStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path, table: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool, table).await
    }

    /// Create an in-memory store for testing.
    pub async fn in_memory(table: &str) -> Result<Self> {
        // Every pooled connection to `:memory:` gets its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, table).await
    }

    async fn with_pool(pool: sqlx::SqlitePool, table: &str) -> Result<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StorageError::InvalidBackend(format!("invalid table name: {:?}", table)));
        }
        let store = Self {
            pool,
            table: table.to_string(),
            feed: ChangeFeed::new(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                owner_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (owner_id, key)
            )",
            self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_from(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Option<CloudRow>> {
        let key: String = row.try_get("key")?;
        let raw: String = row.try_get("value")?;
        let updated: String = row.try_get("updated_at")?;
        let Some(value) = codec::decode(&raw) else {
            warn!("Ignoring undecodable cloud row {}", key);
            return Ok(None);
        };
        Ok(Some(CloudRow {
            owner: row.try_get("owner_id")?,
            key,
            value,
            updated: chrono::DateTime::parse_from_rfc3339(&updated)
                .ok()
                .map(|d| d.with_timezone(&chrono::Utc)),
        }))
    }

    async fn exists(&self, owner: &str, key: &str) -> Result<bool> {
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE owner_id = ? AND key = ?",
            self.table
        ))
        .bind(owner)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RowStore for SqliteRowStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn fetch(&self, session: &Session, key: &str) -> Result<Option<CloudRow>> {
        let row = sqlx::query(&format!(
            "SELECT owner_id, key, value, updated_at FROM {} WHERE owner_id = ? AND key = ?",
            self.table
        ))
        .bind(&session.user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.row_from(&row),
            None => Ok(None),
        }
    }

    async fn fetch_all(&self, session: &Session) -> Result<Vec<CloudRow>> {
        let rows = sqlx::query(&format!(
            "SELECT owner_id, key, value, updated_at FROM {} WHERE owner_id = ? ORDER BY key",
            self.table
        ))
        .bind(&session.user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(r) = self.row_from(row)? {
                out.push(r);
            }
        }
        Ok(out)
    }

    async fn upsert(&self, session: &Session, row: &CloudRow) -> Result<()> {
        let existed = self.exists(&session.user_id, &row.key).await?;
        let updated = row.updated.unwrap_or_else(chrono::Utc::now);

        sqlx::query(&format!(
            "INSERT INTO {} (owner_id, key, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (owner_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            self.table
        ))
        .bind(&session.user_id)
        .bind(&row.key)
        .bind(codec::encode(&row.value))
        .bind(updated.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let op = if existed { ChangeOp::Update } else { ChangeOp::Insert };
        self.feed.publish(&self.table, &session.user_id, op, Some(&row.key));
        Ok(())
    }

    async fn delete(&self, session: &Session, key: &str) -> Result<()> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE owner_id = ? AND key = ?",
            self.table
        ))
        .bind(&session.user_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.feed.publish(&self.table, &session.user_id, ChangeOp::Delete, Some(key));
        }
        Ok(())
    }

    async fn delete_except(&self, session: &Session, keep: &[String]) -> Result<()> {
        let mut sql = format!("DELETE FROM {} WHERE owner_id = ?", self.table);
        if !keep.is_empty() {
            let placeholders = vec!["?"; keep.len()].join(", ");
            sql.push_str(&format!(" AND key NOT IN ({})", placeholders));
        }

        let mut query = sqlx::query(&sql).bind(&session.user_id);
        for key in keep {
            query = query.bind(key);
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() > 0 {
            self.feed.publish(&self.table, &session.user_id, ChangeOp::Delete, None);
        }
        Ok(())
    }
}
