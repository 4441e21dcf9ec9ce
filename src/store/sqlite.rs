use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{CorrelationRecord, CorrelationStore};

/// Fixed-width UTC so that text comparison in SQL matches time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Durable correlation store backed by a SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate before wrapping in the async Mutex.
        Self::run_migrations(&conn)?;

        info!("Correlation store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS correlations (
                forwarded_message_id INTEGER PRIMARY KEY,
                origin_chat_id INTEGER NOT NULL,
                origin_message_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_correlations_created
                ON correlations(created_at);
            ",
        )
        .context("Failed to run correlation store migrations")?;
        Ok(())
    }
}

#[async_trait]
impl CorrelationStore for SqliteStore {
    async fn put(&self, record: CorrelationRecord) -> Result<()> {
        let conn = self.conn.lock().await;

        let existing: Option<(i64, i32)> = conn
            .query_row(
                "SELECT origin_chat_id, origin_message_id FROM correlations
                 WHERE forwarded_message_id = ?1",
                rusqlite::params![record.forwarded_message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to check for an existing correlation")?;

        if let Some((chat_id, message_id)) = existing {
            warn!(
                "Overwriting correlation for forwarded message {}: was chat {} message {}",
                record.forwarded_message_id, chat_id, message_id
            );
        }

        conn.execute(
            "INSERT INTO correlations
                (forwarded_message_id, origin_chat_id, origin_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(forwarded_message_id) DO UPDATE SET
                origin_chat_id = excluded.origin_chat_id,
                origin_message_id = excluded.origin_message_id,
                created_at = excluded.created_at",
            rusqlite::params![
                record.forwarded_message_id,
                record.origin_chat_id,
                record.origin_message_id,
                timestamp(Utc::now()),
            ],
        )
        .context("Failed to store correlation")?;

        Ok(())
    }

    async fn get(&self, forwarded_message_id: i32) -> Result<Option<CorrelationRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT forwarded_message_id, origin_chat_id, origin_message_id
             FROM correlations WHERE forwarded_message_id = ?1",
            rusqlite::params![forwarded_message_id],
            parse_correlation_row,
        )
        .optional()
        .context("Failed to look up correlation")
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM correlations WHERE created_at < ?1",
                rusqlite::params![timestamp(older_than)],
            )
            .context("Failed to prune correlations")?;
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM correlations", [], |row| row.get(0))
            .context("Failed to count correlations")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn parse_correlation_row(row: &rusqlite::Row) -> rusqlite::Result<CorrelationRecord> {
    Ok(CorrelationRecord {
        forwarded_message_id: row.get(0)?,
        origin_chat_id: row.get(1)?,
        origin_message_id: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::path::PathBuf;

    fn record(forwarded: i32, chat: i64, msg: i32) -> CorrelationRecord {
        CorrelationRecord {
            forwarded_message_id: forwarded,
            origin_chat_id: chat,
            origin_message_id: msg,
        }
    }

    fn temp_db(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "relaybot-{}-{}-{}.db",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn remove_db(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(file));
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(record(42, 111, 5)).await.unwrap();

        assert_eq!(store.get(42).await.unwrap(), Some(record(42, 111, 5)));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_negative_chat_ids_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(record(9, -1001234567890, 77)).await.unwrap();

        let found = store.get(9).await.unwrap().unwrap();
        assert_eq!(found.origin_chat_id, -1001234567890);
    }

    #[tokio::test]
    async fn test_duplicate_put_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(record(42, 111, 5)).await.unwrap();
        store.put(record(42, 222, 6)).await.unwrap();

        assert_eq!(store.get(42).await.unwrap(), Some(record(42, 222, 6)));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(record(1, 10, 100)).await.unwrap();
        store.put(record(2, 20, 200)).await.unwrap();

        assert_eq!(
            store.prune(Utc::now() - Duration::days(1)).await.unwrap(),
            0
        );
        assert_eq!(
            store
                .prune(Utc::now() + Duration::seconds(1))
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let path = temp_db("reopen");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(record(42, 111, 5)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get(42).await.unwrap(), Some(record(42, 111, 5)));
        drop(reopened);

        remove_db(&path);
    }
}
