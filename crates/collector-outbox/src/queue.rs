//! Pending queue and its durable mirror.

use crate::payload::EventPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use tracker_kv_storage::{KeyValueStorage, StorageKeys};

/// A pending POST-mode record: stringified fields plus their encoded size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    /// Stringified event fields in wire order.
    pub payload: EventPayload,
    /// Encoded byte length of the serialized payload.
    pub bytes: usize,
}

/// The in-memory queue. A queue instance holds exactly one shape for its
/// entire lifetime, fixed by the resolved transport mode.
#[derive(Debug)]
pub enum PendingQueue {
    /// POST mode: field records awaiting batching.
    Post(VecDeque<PostRecord>),
    /// GET mode: pre-rendered query strings.
    Get(VecDeque<String>),
}

impl PendingQueue {
    /// Number of pending records.
    pub fn len(&self) -> usize {
        match self {
            PendingQueue::Post(queue) => queue.len(),
            PendingQueue::Get(queue) => queue.len(),
        }
    }

    /// Whether no records are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the first `n` records.
    pub fn remove_front(&mut self, n: usize) {
        match self {
            PendingQueue::Post(queue) => {
                queue.drain(..n.min(queue.len()));
            }
            PendingQueue::Get(queue) => {
                queue.drain(..n.min(queue.len()));
            }
        }
    }
}

/// Durable mirror of the pending queue.
///
/// The persisted copy is always a prefix of the in-memory queue truncated
/// to the maximum persisted length. Writes are best-effort: a failed write
/// degrades that operation to in-memory-only and is never surfaced as an
/// error.
pub struct QueueStore {
    storage: Option<Arc<dyn KeyValueStorage>>,
    key: String,
    max_len: usize,
}

impl QueueStore {
    /// Create a store slot namespaced by instance and transport mode.
    pub fn new(
        storage: Option<Arc<dyn KeyValueStorage>>,
        namespace: &str,
        mode_tag: &str,
        max_len: usize,
    ) -> Self {
        Self {
            storage,
            key: StorageKeys::out_queue(namespace, mode_tag),
            max_len,
        }
    }

    /// Whether a durable backend is attached.
    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Load persisted POST records, skipping malformed entries.
    pub fn load_post(&self) -> VecDeque<PostRecord> {
        self.raw_entries()
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<PostRecord>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Skipping malformed persisted record");
                    None
                }
            })
            .collect()
    }

    /// Load persisted GET records, skipping malformed entries.
    pub fn load_get(&self) -> VecDeque<String> {
        self.raw_entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Value::String(query) => Some(query),
                other => {
                    warn!(key = %self.key, entry = %other, "Skipping malformed persisted record");
                    None
                }
            })
            .collect()
    }

    /// Mirror the queue into storage, truncated to the persisted cap.
    ///
    /// Returns whether the write landed; the caller uses a failed write as
    /// a drain trigger so unpersisted records leave quickly.
    pub fn persist(&self, queue: &PendingQueue) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };

        let serialized = match queue {
            PendingQueue::Post(records) => {
                serde_json::to_string(&records.iter().take(self.max_len).collect::<Vec<_>>())
            }
            PendingQueue::Get(records) => {
                serde_json::to_string(&records.iter().take(self.max_len).collect::<Vec<_>>())
            }
        };

        let serialized = match serialized {
            Ok(serialized) => serialized,
            Err(e) => {
                debug!(key = %self.key, error = %e, "Queue serialization failed");
                return false;
            }
        };

        match storage.set(&self.key, &serialized) {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %self.key, error = %e, "Queue persist failed, staying in-memory");
                false
            }
        }
    }

    /// Read the persisted value as a JSON array, leniently.
    ///
    /// Any read failure, parse failure, or non-array value resets to an
    /// empty queue; corrupted persisted state is discarded silently.
    fn raw_entries(&self) -> Vec<Value> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        let raw = match storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(key = %self.key, error = %e, "Queue read failed");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) | Err(_) => {
                warn!(key = %self.key, "Discarding corrupted persisted queue");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracker_kv_storage::MemoryStorage;

    fn record(event: &str) -> PostRecord {
        let mut payload = EventPayload::new();
        payload.insert("e".to_string(), json!(event));
        PostRecord {
            payload,
            bytes: event.len() + 10,
        }
    }

    fn store_with(storage: Arc<dyn KeyValueStorage>, max_len: usize) -> QueueStore {
        QueueStore::new(Some(storage), "t1", "post", max_len)
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone(), 100);

        let queue = PendingQueue::Post(VecDeque::from(vec![record("pv"), record("se")]));
        assert!(store.persist(&queue));

        let loaded = store.load_post();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].payload["e"], json!("pv"));
        assert_eq!(loaded[1].payload["e"], json!("se"));
    }

    #[test]
    fn test_get_mode_roundtrip() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let store = QueueStore::new(Some(storage), "t1", "get", 100);

        let queue = PendingQueue::Get(VecDeque::from(vec![
            "?e=pv".to_string(),
            "?e=se".to_string(),
        ]));
        assert!(store.persist(&queue));

        let loaded = store.load_get();
        assert_eq!(loaded, VecDeque::from(vec!["?e=pv".to_string(), "?e=se".to_string()]));
    }

    #[test]
    fn test_persisted_copy_truncated_to_max_len() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone(), 2);

        let queue = PendingQueue::Post(VecDeque::from(vec![
            record("a"),
            record("b"),
            record("c"),
        ]));
        assert!(store.persist(&queue));

        // The persisted copy is a prefix, capped; memory keeps all three.
        assert_eq!(store.load_post().len(), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_corrupted_value_resets_to_empty() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        storage
            .set(&StorageKeys::out_queue("t1", "post"), "{not json")
            .unwrap();

        let store = store_with(storage, 100);
        assert!(store.load_post().is_empty());
    }

    #[test]
    fn test_non_array_value_resets_to_empty() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        storage
            .set(&StorageKeys::out_queue("t1", "post"), r#"{"a":1}"#)
            .unwrap();

        let store = store_with(storage, 100);
        assert!(store.load_post().is_empty());
    }

    #[test]
    fn test_malformed_entries_skipped_not_fatal() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        storage
            .set(
                &StorageKeys::out_queue("t1", "post"),
                r#"[{"payload":{"e":"pv"},"bytes":12},42,{"wrong":"shape"}]"#,
            )
            .unwrap();

        let store = store_with(storage, 100);
        let loaded = store.load_post();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].payload["e"], json!("pv"));
    }

    #[test]
    fn test_persist_without_storage_reports_false() {
        let store = QueueStore::new(None, "t1", "post", 100);
        let queue = PendingQueue::Post(VecDeque::from(vec![record("pv")]));
        assert!(!store.persist(&queue));
        assert!(!store.is_persistent());
    }

    #[test]
    fn test_remove_front_bounds() {
        let mut queue = PendingQueue::Post(VecDeque::from(vec![record("a"), record("b")]));
        queue.remove_front(5);
        assert!(queue.is_empty());
    }
}
