//! Typed record store with change notification.
//!
//! Wraps a [`TableStore`] with serde (de)serialization and publishes a
//! [`Change`] on a broadcast bus after every successful write. The store
//! version increases by one per write, so a reader that saw version `v`
//! has seen every write up to `v`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::StoreFault;
use crate::normalize::Normalized;
use crate::records::{Record, Table};
use crate::store::{MemoryTableStore, StoredRow, TableStore};

/// Default capacity of the change bus.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// A write notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub table: Table,
    pub id: String,
    /// Store version after the write.
    pub version: u64,
}

/// Result of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Stored,
    /// A newer version of the replaceable record is already stored.
    Stale,
}

struct Inner {
    backend: Arc<dyn TableStore>,
    version: AtomicU64,
    changes: broadcast::Sender<Change>,
    /// Serializes the read-compare-write of a put.
    write_lock: Mutex<()>,
}

/// Shared handle to the record store.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<Inner>,
}

impl RecordStore {
    /// Wrap a table store.
    pub fn new(backend: Arc<dyn TableStore>, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                backend,
                version: AtomicU64::new(0),
                changes,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// A store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTableStore::new()), DEFAULT_CHANGE_CAPACITY)
    }

    /// Idempotent upsert.
    ///
    /// Replaceable records that are strictly older than the stored version
    /// are skipped; everything else overwrites the stored record entirely.
    pub fn put<R: Record>(&self, record: &R) -> Result<PutOutcome, StoreFault> {
        let table = R::TABLE;
        let id = record.id();
        let body = serde_json::to_string(record).map_err(|e| StoreFault::Serialize {
            table,
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        let _guard = self
            .inner
            .write_lock
            .lock()
            .map_err(|_| StoreFault::Io("record store lock poisoned".to_string()))?;

        if let Some(incoming) = record.replaced_at()
            && let Some(stored) = self.get::<R>(id)?
            && stored.replaced_at().is_some_and(|current| incoming < current)
        {
            trace!(table = %table, id = %id, "skipping stale replaceable record");
            return Ok(PutOutcome::Stale);
        }

        self.inner
            .backend
            .put(table, id, &body, &record.index_entries())?;
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(table = %table, id = %id, version, "record stored");

        // No receivers is fine: nobody is watching yet
        let _ = self.inner.changes.send(Change {
            table,
            id: id.to_string(),
            version,
        });

        Ok(PutOutcome::Stored)
    }

    /// Upsert whichever record a normalizer produced.
    pub fn put_normalized(&self, record: &Normalized) -> Result<PutOutcome, StoreFault> {
        match record {
            Normalized::Article(r) => self.put(r),
            Normalized::Highlight(r) => self.put(r),
            Normalized::Note(r) => self.put(r),
            Normalized::BookmarkList(r) => self.put(r),
            Normalized::EncryptedNote(r) => self.put(r),
            Normalized::UserProfile(r) => self.put(r),
            Normalized::Zap(r) => self.put(r),
        }
    }

    /// Fetch by identifier.
    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>, StoreFault> {
        self.inner
            .backend
            .get(R::TABLE, id)?
            .map(|body| decode::<R>(id, &body))
            .transpose()
    }

    /// Whether a record with this identifier is stored.
    pub fn contains<R: Record>(&self, id: &str) -> Result<bool, StoreFault> {
        Ok(self.inner.backend.get(R::TABLE, id)?.is_some())
    }

    /// Records whose `index` entry equals `key`.
    pub fn by_index<R: Record>(&self, index: &str, key: &str) -> Result<Vec<R>, StoreFault> {
        decode_rows(self.inner.backend.lookup(R::TABLE, index, key)?)
    }

    /// Records for each stored identifier in `ids`, in `ids` order.
    pub fn by_ids<R: Record>(&self, ids: &[String]) -> Result<Vec<R>, StoreFault> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get::<R>(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Every record of a table.
    pub fn all<R: Record>(&self) -> Result<Vec<R>, StoreFault> {
        decode_rows(self.inner.backend.scan(R::TABLE)?)
    }

    /// Listen for writes made after this call.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        debug!(receivers = self.inner.changes.receiver_count() + 1, "change listener added");
        self.inner.changes.subscribe()
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }
}

fn decode<R: Record>(id: &str, body: &str) -> Result<R, StoreFault> {
    serde_json::from_str(body).map_err(|e| StoreFault::Corrupt {
        table: R::TABLE,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn decode_rows<R: Record>(rows: Vec<StoredRow>) -> Result<Vec<R>, StoreFault> {
    rows.iter().map(|row| decode::<R>(&row.id, &row.body)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BookmarkList, Note, index};
    use pretty_assertions::assert_eq;

    fn note(id: &str, pubkey: &str, content: &str) -> Note {
        Note {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            content: content.to_string(),
            reply_to: None,
            quote_of: None,
            created_at: 1,
            event: String::new(),
            thread: Vec::new(),
            quotes: Vec::new(),
        }
    }

    fn list(created_at: i64, title: &str) -> BookmarkList {
        BookmarkList {
            id: "30003:pk:reading".to_string(),
            pubkey: "pk".to_string(),
            title: title.to_string(),
            description: String::new(),
            naddr: String::new(),
            created_at,
            event: String::new(),
            event_id: format!("e{created_at}"),
        }
    }

    #[test]
    fn test_put_twice_keeps_one_record_with_later_values() {
        let store = RecordStore::in_memory();
        store.put(&note("n1", "alice", "first")).unwrap();
        store.put(&note("n1", "alice", "second")).unwrap();

        let all: Vec<Note> = store.all().unwrap();
        assert_eq!(all, vec![note("n1", "alice", "second")]);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_replaceable_skips_strictly_older() {
        let store = RecordStore::in_memory();
        assert_eq!(store.put(&list(20, "new")).unwrap(), PutOutcome::Stored);
        assert_eq!(store.put(&list(10, "old")).unwrap(), PutOutcome::Stale);
        assert_eq!(store.put(&list(20, "same age")).unwrap(), PutOutcome::Stored);

        let stored: BookmarkList = store.get("30003:pk:reading").unwrap().unwrap();
        assert_eq!(stored.title, "same age");
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_index_and_id_lookups() {
        let store = RecordStore::in_memory();
        store.put(&note("n1", "alice", "a")).unwrap();
        store.put(&note("n2", "bob", "b")).unwrap();

        let alice: Vec<Note> = store.by_index(index::PUBKEY, "alice").unwrap();
        assert_eq!(alice.len(), 1);

        let found: Vec<Note> = store
            .by_ids(&["n2".to_string(), "missing".to_string(), "n1".to_string()])
            .unwrap();
        let ids: Vec<_> = found.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n1"]);

        assert!(store.contains::<Note>("n1").unwrap());
        assert!(!store.contains::<BookmarkList>("n1").unwrap());
    }

    #[test]
    fn test_corrupt_body_is_a_fault() {
        let backend = Arc::new(MemoryTableStore::new());
        backend.put(Table::Notes, "bad", "{not json", &[]).unwrap();
        let store = RecordStore::new(backend, 16);

        assert!(matches!(
            store.get::<Note>("bad"),
            Err(StoreFault::Corrupt { table: Table::Notes, .. })
        ));
        assert!(store.all::<Note>().is_err());
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let store = RecordStore::in_memory();
        let mut changes = store.subscribe_changes();
        store.put(&note("n1", "alice", "a")).unwrap();

        assert_eq!(
            changes.recv().await.unwrap(),
            Change {
                table: Table::Notes,
                id: "n1".to_string(),
                version: 1
            }
        );
    }
}
