//! Subscription managers, one per record kind.
//!
//! A manager turns typed options into network filters and a matching store
//! query. `load` returns the live query first (so cached records are
//! visible before any network round trip) together with the handles of the
//! subscriptions it opened. Each subscription feeds an ingest task that
//! normalizes and upserts every inbound event.

mod article;
mod bookmark;
mod encrypted;
mod highlight;
mod note;
mod profile;
mod zap;

pub use article::{ArticleManager, ArticleOptions};
pub use bookmark::{BookmarkListManager, BookmarkListOptions};
pub use encrypted::{EncryptedNoteManager, EncryptedNoteOptions};
pub use highlight::{HighlightManager, HighlightOptions};
pub use note::{NoteManager, NoteOptions};
pub use profile::ProfileManager;
pub use zap::{ZapManager, ZapOptions};

use std::collections::{BTreeMap, BTreeSet};

use glean_nostr::{
    Event, Filter, MalformedReference, Reference, SubscribeOptions, Subscription,
    SubscriptionItem, decode_npub,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::context::SyncContext;
use crate::error::StoreFault;
use crate::live::LiveQuery;
use crate::record_store::PutOutcome;
use crate::records::Record;

/// Counters kept by an ingest task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Events received.
    pub received: usize,
    /// Records written.
    pub stored: usize,
    /// Events dropped on purpose, or older than the stored version.
    pub skipped: usize,
    /// Events that failed normalization.
    pub failed: usize,
    /// The store fault that stopped the task, if any.
    pub fault: Option<StoreFault>,
}

impl IngestStats {
    /// Add another task's counters to these.
    pub fn merge(&mut self, other: IngestStats) {
        self.received += other.received;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.failed += other.failed;
        if self.fault.is_none() {
            self.fault = other.fault;
        }
    }
}

/// Lifecycle handle for one network subscription and its ingest task.
///
/// Closing (or dropping) the handle stops inbound events. Records already
/// stored stay.
pub struct StreamHandle {
    subscription_id: String,
    label: &'static str,
    close_tx: watch::Sender<bool>,
    loaded: watch::Receiver<bool>,
    progress: watch::Receiver<IngestStats>,
    task: JoinHandle<IngestStats>,
}

impl StreamHandle {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Which manager stream this is, for logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Stop receiving events.
    pub fn close(&self) {
        if !self.close_tx.send_replace(true) {
            debug!(stream = self.label, subscription = %self.subscription_id, "closing stream");
        }
    }

    /// Wait until the stored events have been ingested (or the stream
    /// ended).
    pub async fn stored_events_loaded(&mut self) {
        let _ = self.loaded.wait_for(|loaded| *loaded).await;
    }

    /// Counters so far.
    pub fn stats(&self) -> IngestStats {
        self.progress.borrow().clone()
    }

    /// Wait until at least `count` events have been received (or the stream
    /// ended).
    pub async fn wait_received(&mut self, count: usize) {
        let _ = self.progress.wait_for(|stats| stats.received >= count).await;
    }

    /// Wait for the ingest task to finish and return its counters.
    ///
    /// Streaming subscriptions only finish once closed.
    pub async fn join(self) -> IngestStats {
        let StreamHandle {
            label,
            close_tx,
            task,
            ..
        } = self;

        let stats = match task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(stream = label, error = %e, "ingest task failed");
                IngestStats::default()
            }
        };
        drop(close_tx);
        stats
    }
}

/// A live query plus the streams feeding it.
pub struct Loaded<T> {
    pub query: LiveQuery<T>,
    pub streams: Vec<StreamHandle>,
}

impl<T> Loaded<T> {
    /// Wait until every stream has ingested its stored events.
    pub async fn stored_events_loaded(&mut self) {
        for stream in &mut self.streams {
            stream.stored_events_loaded().await;
        }
    }

    /// Close every stream.
    pub fn close_streams(&self) {
        for stream in &self.streams {
            stream.close();
        }
    }

    /// Close every stream and collect the combined counters.
    pub async fn finish(self) -> IngestStats {
        let mut total = IngestStats::default();
        for stream in self.streams {
            stream.close();
            total.merge(stream.join().await);
        }
        total
    }
}

/// Open a subscription and start ingesting it.
///
/// A network failure is treated as "no events yet": it is logged and no
/// handle is returned, leaving the caller with cached records only.
pub(crate) async fn open_stream(
    ctx: &SyncContext,
    label: &'static str,
    filters: Vec<Filter>,
    options: SubscribeOptions,
) -> Option<StreamHandle> {
    match ctx.network().subscribe(filters, options).await {
        Ok(subscription) => Some(spawn_ingest(ctx.clone(), subscription, label)),
        Err(e) => {
            warn!(stream = label, error = %e, "subscription failed; serving cached records only");
            None
        }
    }
}

/// Spawn the ingest task for an open subscription.
pub(crate) fn spawn_ingest(
    ctx: SyncContext,
    subscription: Subscription,
    label: &'static str,
) -> StreamHandle {
    let subscription_id = subscription.id().to_string();
    let (close_tx, close_rx) = watch::channel(false);
    let (loaded_tx, loaded_rx) = watch::channel(false);
    let (progress_tx, progress_rx) = watch::channel(IngestStats::default());

    debug!(stream = label, subscription = %subscription_id, "stream opened");
    let task = tokio::spawn(ingest(
        ctx,
        subscription,
        label,
        close_rx,
        loaded_tx,
        progress_tx,
    ));

    StreamHandle {
        subscription_id,
        label,
        close_tx,
        loaded: loaded_rx,
        progress: progress_rx,
        task,
    }
}

async fn ingest(
    ctx: SyncContext,
    mut subscription: Subscription,
    label: &'static str,
    mut close_rx: watch::Receiver<bool>,
    loaded_tx: watch::Sender<bool>,
    progress_tx: watch::Sender<IngestStats>,
) -> IngestStats {
    let mut stats = IngestStats::default();

    loop {
        tokio::select! {
            biased;

            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    subscription.close();
                    break;
                }
            }

            item = subscription.next() => match item {
                Some(SubscriptionItem::Event(event)) => {
                    if let Err(fault) = ingest_event(&ctx, label, &event, &mut stats) {
                        error!(stream = label, id = %event.id, error = %fault, "store fault; stopping stream");
                        stats.fault = Some(fault);
                        subscription.close();
                        break;
                    }
                    progress_tx.send_replace(stats.clone());
                }
                Some(SubscriptionItem::EndOfStoredEvents) => {
                    debug!(stream = label, stored = stats.stored, failed = stats.failed, "stored events loaded");
                    loaded_tx.send_replace(true);
                }
                None => break,
            },
        }
    }

    loaded_tx.send_replace(true);
    progress_tx.send_replace(stats.clone());
    debug!(
        stream = label,
        received = stats.received,
        stored = stats.stored,
        skipped = stats.skipped,
        failed = stats.failed,
        "stream finished"
    );
    stats
}

/// Normalize and upsert one event. Only store faults are errors.
pub(crate) fn ingest_event(
    ctx: &SyncContext,
    label: &'static str,
    event: &Event,
    stats: &mut IngestStats,
) -> Result<(), StoreFault> {
    stats.received += 1;
    trace!(stream = label, id = %event.id, kind = event.kind, "event received");

    match ctx.normalizer().normalize(event) {
        Ok(Some(record)) => match ctx.store().put_normalized(&record)? {
            PutOutcome::Stored => stats.stored += 1,
            PutOutcome::Stale => stats.skipped += 1,
        },
        Ok(None) => stats.skipped += 1,
        Err(e) => {
            warn!(stream = label, id = %event.id, kind = event.kind, error = %e, "dropping event that failed normalization");
            stats.failed += 1;
        }
    }
    Ok(())
}

/// Decode author keys given as `npub1...` or hex.
pub(crate) fn parse_pubkeys(keys: &[String]) -> Result<BTreeSet<String>, MalformedReference> {
    keys.iter().map(|key| decode_npub(key)).collect()
}

/// Decode an event id given as `note1...`, `nevent1...` or hex.
pub(crate) fn parse_event_id(input: &str) -> Result<String, MalformedReference> {
    match Reference::parse(input)? {
        Reference::EventId(id) => Ok(id),
        _ => Err(MalformedReference {
            input: input.to_string(),
            reason: "expected an event id".to_string(),
        }),
    }
}

pub(crate) fn parse_event_ids(ids: &[String]) -> Result<BTreeSet<String>, MalformedReference> {
    ids.iter().map(|id| parse_event_id(id)).collect()
}

/// Add the tag clause that points at `reference`.
pub(crate) fn reference_clause(filter: Filter, reference: &Reference) -> Filter {
    filter.tag(reference.tag_letter(), [reference.query_key()])
}

/// Merge candidate batches, keeping one record per identifier.
pub(crate) fn union<R: Record>(batches: impl IntoIterator<Item = Vec<R>>) -> Vec<R> {
    let mut by_id = BTreeMap::new();
    for record in batches.into_iter().flatten() {
        by_id.insert(record.id().to_string(), record);
    }
    by_id.into_values().collect()
}

/// Sort newest first (ties by identifier) and apply `limit`.
pub(crate) fn newest_first<R: Record>(
    mut records: Vec<R>,
    created_at: impl Fn(&R) -> i64,
    limit: Option<usize>,
) -> Vec<R> {
    records.sort_by(|a, b| {
        created_at(b)
            .cmp(&created_at(a))
            .then_with(|| a.id().cmp(b.id()))
    });
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    records
}
