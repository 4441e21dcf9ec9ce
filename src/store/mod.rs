pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::StoreConfig;
use crate::store::memory::InMemoryStore;
use crate::store::sqlite::SqliteStore;

/// Link between the copy posted into the forwarding chat and the private
/// message it came from. Keyed by `forwarded_message_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationRecord {
    pub forwarded_message_id: i32,
    pub origin_chat_id: i64,
    pub origin_message_id: i32,
}

/// Mapping from forwarded message ids to their origin.
///
/// `get` returns `Ok(None)` for unknown keys; a miss is a normal routing
/// outcome. Implementations must tolerate concurrent `put`/`get` calls.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Store a record. An existing record for the same key is overwritten.
    async fn put(&self, record: CorrelationRecord) -> Result<()>;

    async fn get(&self, forwarded_message_id: i32) -> Result<Option<CorrelationRecord>>;

    /// Remove records stored before `older_than`, returning how many went.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    /// Short label for logs.
    fn backend(&self) -> &'static str;
}

/// Open the backend selected by configuration: SQLite when a database
/// path is set, otherwise a process-local map.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn CorrelationStore>> {
    match &config.database_path {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database path configured, correlations are kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_without_path_is_in_memory() {
        let store = open(&StoreConfig::default()).unwrap();
        assert_eq!(store.backend(), "memory");
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_with_path_is_sqlite() {
        let path = std::env::temp_dir().join(format!(
            "relaybot-open-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let config = StoreConfig {
            database_path: Some(path.clone()),
            ..StoreConfig::default()
        };

        let store = open(&config).unwrap();
        assert_eq!(store.backend(), "sqlite");
        drop(store);

        let _ = std::fs::remove_file(&path);
    }
}
