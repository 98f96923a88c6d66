//! Live queries over the record store.
//!
//! A live query is a read-only function of the store. It is evaluated once
//! when subscribed, then again after every write to a table its last
//! evaluation read. Each delivered [`Snapshot`] carries the store version it
//! was evaluated at, and a handle never delivers a version older than one
//! it already delivered.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{broadcast, watch};
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, trace, warn};

use crate::error::StoreFault;
use crate::record_store::{Change, RecordStore};
use crate::records::{Record, Table};

/// One evaluation of a live query.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Store version the query was evaluated at.
    pub version: u64,
    pub result: Result<T, StoreFault>,
}

/// Read access to the store that remembers which tables were read.
pub struct QueryScope<'a> {
    store: &'a RecordStore,
    touched: RefCell<BTreeSet<Table>>,
}

impl<'a> QueryScope<'a> {
    fn new(store: &'a RecordStore) -> Self {
        Self {
            store,
            touched: RefCell::new(BTreeSet::new()),
        }
    }

    fn touch(&self, table: Table) {
        self.touched.borrow_mut().insert(table);
    }

    fn into_touched(self) -> BTreeSet<Table> {
        self.touched.into_inner()
    }

    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>, StoreFault> {
        self.touch(R::TABLE);
        self.store.get(id)
    }

    pub fn by_index<R: Record>(&self, index: &str, key: &str) -> Result<Vec<R>, StoreFault> {
        self.touch(R::TABLE);
        self.store.by_index(index, key)
    }

    pub fn by_ids<R: Record>(&self, ids: &[String]) -> Result<Vec<R>, StoreFault> {
        self.touch(R::TABLE);
        self.store.by_ids(ids)
    }

    pub fn all<R: Record>(&self) -> Result<Vec<R>, StoreFault> {
        self.touch(R::TABLE);
        self.store.all()
    }
}

type QueryFn<T> = dyn Fn(&QueryScope<'_>) -> Result<T, StoreFault> + Send + Sync;

/// Subscribes consumers to store queries.
#[derive(Clone)]
pub struct LiveQueryEngine {
    store: RecordStore,
}

impl LiveQueryEngine {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Subscribe to `query`.
    ///
    /// The first snapshot is evaluated before this returns. Must be called
    /// within a tokio runtime.
    pub fn subscribe<T, F>(&self, query: F) -> LiveQuery<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&QueryScope<'_>) -> Result<T, StoreFault> + Send + Sync + 'static,
    {
        // Listen before evaluating so no write slips between the two
        let changes = self.store.subscribe_changes();
        let query: Arc<QueryFn<T>> = Arc::new(query);

        let (snapshot, tables) = evaluate(&self.store, query.as_ref());
        trace!(version = snapshot.version, tables = ?tables, "live query subscribed");

        let (tx, rx) = watch::channel(snapshot);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(refresh_loop(
            self.store.clone(),
            query,
            tables,
            changes,
            tx,
            cancel_rx,
        ));

        LiveQuery {
            rx,
            cancel: cancel_tx,
        }
    }
}

fn evaluate<T>(store: &RecordStore, query: &QueryFn<T>) -> (Snapshot<T>, BTreeSet<Table>) {
    // Everything up to this version is visible to the evaluation
    let version = store.version();
    let scope = QueryScope::new(store);
    let result = query(&scope);
    if let Err(fault) = &result {
        warn!(error = %fault, "live query evaluation failed");
    }
    (Snapshot { version, result }, scope.into_touched())
}

async fn refresh_loop<T: Clone + Send + Sync + 'static>(
    store: RecordStore,
    query: Arc<QueryFn<T>>,
    mut tables: BTreeSet<Table>,
    mut changes: broadcast::Receiver<Change>,
    tx: watch::Sender<Snapshot<T>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = cancel.changed() => {
                // Unsubscribed, or the handle is gone
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }

            _ = tx.closed() => break,

            change = changes.recv() => match change {
                Ok(change) => {
                    if !tables.contains(&change.table) {
                        continue;
                    }
                    trace!(table = %change.table, id = %change.id, version = change.version, "re-evaluating live query");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "live query lagged behind the change bus; re-evaluating");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }

        let (snapshot, touched) = evaluate(&store, query.as_ref());
        tables = touched;

        // Evaluations that finish after unsubscribe are discarded
        if *cancel.borrow() {
            break;
        }
        tx.send_if_modified(|current| {
            if snapshot.version > current.version {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    trace!("live query stopped");
}

/// A live handle on a query's results.
///
/// Dropping the handle unsubscribes.
pub struct LiveQuery<T> {
    rx: watch::Receiver<Snapshot<T>>,
    cancel: watch::Sender<bool>,
}

impl<T: Clone> LiveQuery<T> {
    /// The latest delivered snapshot.
    pub fn current(&self) -> Snapshot<T> {
        self.rx.borrow().clone()
    }

    /// Version of the latest delivered snapshot.
    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Wait for the next snapshot. Returns `None` once unsubscribed.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        if !self.is_active() {
            return None;
        }
        self.rx.changed().await.ok()?;
        if !self.is_active() {
            return None;
        }
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stop deliveries.
    pub fn unsubscribe(&mut self) {
        if !self.cancel.send_replace(true) {
            trace!("live query unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        !*self.cancel.borrow()
    }

    /// A stream of snapshots, starting with the current one.
    pub fn into_stream(self) -> LiveQueryStream<T>
    where
        T: Send + Sync + 'static,
    {
        LiveQueryStream {
            inner: WatchStream::new(self.rx.clone()),
            _query: self,
        }
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

/// Stream form of a [`LiveQuery`]; ends when unsubscribed.
pub struct LiveQueryStream<T> {
    inner: WatchStream<Snapshot<T>>,
    _query: LiveQuery<T>,
}

impl<T: Clone + Send + Sync + 'static> Stream for LiveQueryStream<T> {
    type Item = Snapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Note, index};
    use std::time::Duration;

    fn note(id: &str, pubkey: &str) -> Note {
        Note {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            content: String::new(),
            reply_to: None,
            quote_of: None,
            created_at: 1,
            event: String::new(),
            thread: Vec::new(),
            quotes: Vec::new(),
        }
    }

    fn notes_by(engine: &LiveQueryEngine, pubkey: &'static str) -> LiveQuery<Vec<String>> {
        engine.subscribe(move |scope| {
            Ok(scope
                .by_index::<Note>(index::PUBKEY, pubkey)?
                .into_iter()
                .map(|n| n.id)
                .collect())
        })
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_immediate() {
        let store = RecordStore::in_memory();
        store.put(&note("n1", "alice")).unwrap();
        let engine = LiveQueryEngine::new(store);

        let query = notes_by(&engine, "alice");
        let snapshot = query.current();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.result, Ok(vec!["n1".to_string()]));
    }

    #[tokio::test]
    async fn test_redelivers_after_relevant_write() {
        let store = RecordStore::in_memory();
        let engine = LiveQueryEngine::new(store.clone());
        let mut query = notes_by(&engine, "alice");

        store.put(&note("n1", "alice")).unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), query.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.result, Ok(vec!["n1".to_string()]));
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn test_versions_never_go_backwards() {
        let store = RecordStore::in_memory();
        let engine = LiveQueryEngine::new(store.clone());
        let mut query = notes_by(&engine, "alice");

        let mut last = query.version();
        for i in 0..20 {
            store.put(&note(&format!("n{i}"), "alice")).unwrap();
        }
        while last < 20 {
            let snapshot = tokio::time::timeout(Duration::from_secs(5), query.changed())
                .await
                .unwrap()
                .unwrap();
            assert!(snapshot.version > last);
            last = snapshot.version;
        }
        assert_eq!(query.current().result.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let store = RecordStore::in_memory();
        let engine = LiveQueryEngine::new(store.clone());
        let mut query = notes_by(&engine, "alice");

        query.unsubscribe();
        store.put(&note("n1", "alice")).unwrap();

        assert!(!query.is_active());
        assert_eq!(query.changed().await, None);
        assert_eq!(query.current().version, 0);
    }

    #[tokio::test]
    async fn test_stream_starts_with_current() {
        use tokio_stream::StreamExt;

        let store = RecordStore::in_memory();
        store.put(&note("n1", "alice")).unwrap();
        let engine = LiveQueryEngine::new(store);

        let mut stream = notes_by(&engine, "alice").into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.result, Ok(vec!["n1".to_string()]));
    }
}
