use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use super::{CorrelationRecord, CorrelationStore};

struct Entry {
    record: CorrelationRecord,
    stored_at: DateTime<Utc>,
}

/// Process-local correlation store. Everything is lost on restart.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<i32, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for InMemoryStore {
    async fn put(&self, record: CorrelationRecord) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(
            record.forwarded_message_id,
            Entry {
                record,
                stored_at: Utc::now(),
            },
        );

        if let Some(previous) = previous {
            warn!(
                "Overwrote correlation for forwarded message {}: was {:?}, now {:?}",
                record.forwarded_message_id, previous.record, record
            );
        }
        Ok(())
    }

    async fn get(&self, forwarded_message_id: i32) -> Result<Option<CorrelationRecord>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&forwarded_message_id).map(|e| e.record))
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.stored_at >= older_than);
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn record(forwarded: i32, chat: i64, msg: i32) -> CorrelationRecord {
        CorrelationRecord {
            forwarded_message_id: forwarded,
            origin_chat_id: chat,
            origin_message_id: msg,
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryStore::new();
        store.put(record(42, 111, 5)).await.unwrap();

        assert_eq!(store.get(42).await.unwrap(), Some(record(42, 111, 5)));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.get(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_put_overwrites() {
        let store = InMemoryStore::new();
        store.put(record(42, 111, 5)).await.unwrap();
        store.put(record(42, 222, 9)).await.unwrap();

        assert_eq!(store.get(42).await.unwrap(), Some(record(42, 222, 9)));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_only_older_entries() {
        let store = InMemoryStore::new();
        store.put(record(1, 10, 100)).await.unwrap();
        store.put(record(2, 20, 200)).await.unwrap();

        let removed = store
            .prune(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .prune(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put(record(i, i64::from(i) * 10, i + 1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len().await.unwrap(), 32);
        assert_eq!(store.get(31).await.unwrap(), Some(record(31, 310, 32)));
    }
}
