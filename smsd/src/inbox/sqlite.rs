use super::InboxStore;
use crate::modem::sms::InboundMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context as _, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS inbox (
    id          TEXT PRIMARY KEY NOT NULL,
    slot        INTEGER NOT NULL,
    sender      TEXT NOT NULL,
    text        TEXT NOT NULL,
    read        INTEGER NOT NULL,
    timestamp   TEXT NOT NULL,
    received_at TEXT NOT NULL
)";

#[derive(sqlx::FromRow)]
struct Row {
    id: String,
    slot: i64,
    sender: String,
    text: String,
    read: bool,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
}

impl From<Row> for InboundMessage {
    fn from(row: Row) -> Self {
        Self {
            id: row.id,
            sender: row.sender,
            text: row.text,
            timestamp: row.timestamp,
            slot: u16::try_from(row.slot).unwrap_or_default(),
            read: row.read,
            received_at: row.received_at,
        }
    }
}

/// Durable inbox. The content fingerprint is the primary key, so a message
/// that is read twice is stored once.
#[derive(Clone)]
pub struct SqliteInbox {
    pool: SqlitePool,
}

impl SqliteInbox {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .wrap_err_with(|| format!("failed to open database at {}", path.display()))?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .wrap_err("failed to create inbox table")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl InboxStore for SqliteInbox {
    async fn insert(&self, msg: &InboundMessage) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO inbox (id, slot, sender, text, read, timestamp, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(i64::from(msg.slot))
        .bind(&msg.sender)
        .bind(&msg.text)
        .bind(msg.read)
        .bind(msg.timestamp)
        .bind(msg.received_at)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("failed to store message {}", msg.id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> Result<Vec<InboundMessage>> {
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT id, slot, sender, text, read, timestamp, received_at
             FROM inbox ORDER BY received_at, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .wrap_err("failed to list inbox")?;

        Ok(rows.into_iter().map(InboundMessage::from).collect())
    }
}
