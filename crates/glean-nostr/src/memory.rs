//! In-process event network.
//!
//! `MemoryNetwork` behaves like a single well-behaved relay living inside the
//! process: published events are kept, subscriptions receive the stored
//! matches followed by end-of-stored-events, and streaming subscriptions
//! then receive every later matching publish. It backs the test suites and
//! offline runs of the CLI.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    Event, EventNetworkClient, Filter, NostrError, SubscribeOptions, Subscription,
    SubscriptionItem,
};

/// Per-subscription channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

struct LiveSubscription {
    filters: Vec<Filter>,
    tx: mpsc::Sender<SubscriptionItem>,
    closed: watch::Receiver<bool>,
}

/// An in-memory event network.
#[derive(Default)]
pub struct MemoryNetwork {
    /// Published events by id.
    events: DashMap<String, Event>,
    /// Open streaming subscriptions by id.
    live: DashMap<String, LiveSubscription>,
    /// Number of subscriptions ever opened.
    subscriptions_opened: AtomicUsize,
    /// When set, every request fails as if no relay were reachable.
    offline: AtomicBool,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event: store it and fan it out to matching subscriptions.
    pub fn publish(&self, event: Event) {
        trace!(id = %event.id, kind = event.kind, "memory network: publish");

        let mut finished = Vec::new();
        for entry in self.live.iter() {
            let sub = entry.value();
            if *sub.closed.borrow() || sub.tx.is_closed() {
                finished.push(entry.key().clone());
                continue;
            }
            if sub.filters.iter().any(|f| f.matches(&event))
                && let Err(e) = sub.tx.try_send(SubscriptionItem::Event(Box::new(event.clone())))
            {
                warn!(subscription = %entry.key(), error = %e, "memory network: dropping event");
            }
        }
        for id in finished {
            self.live.remove(&id);
        }

        self.events.insert(event.id.clone(), event);
    }

    /// Make every following request fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// How many subscriptions have been opened so far.
    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions_opened.load(Ordering::SeqCst)
    }

    /// How many streaming subscriptions are still open.
    pub fn live_subscriptions(&self) -> usize {
        self.live
            .iter()
            .filter(|entry| !*entry.value().closed.borrow() && !entry.value().tx.is_closed())
            .count()
    }

    /// Stored events matching `filter`, newest first, honouring its limit.
    fn stored_matches(&self, filter: &Filter) -> Vec<Event> {
        let mut matches: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.result_limit() {
            matches.truncate(limit);
        }
        matches
    }
}

#[async_trait]
impl EventNetworkClient for MemoryNetwork {
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscribeOptions,
    ) -> Result<Subscription, NostrError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NostrError::Connection("memory network is offline".to_string()));
        }

        if let Some(delay) = options.group_delay {
            tokio::time::sleep(delay).await;
        }

        self.subscriptions_opened.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        let mut seen = HashSet::new();
        for filter in &filters {
            for event in self.stored_matches(filter) {
                if seen.insert(event.id.clone())
                    && tx.try_send(SubscriptionItem::Event(Box::new(event))).is_err()
                {
                    warn!(subscription = %id, "memory network: stored backlog exceeds channel");
                }
            }
        }
        if tx.try_send(SubscriptionItem::EndOfStoredEvents).is_err() {
            warn!(subscription = %id, "memory network: could not deliver EOSE");
        }

        debug!(
            subscription = %id,
            filters = filters.len(),
            backlog = seen.len(),
            close_on_eose = options.close_on_eose,
            "memory network: subscription opened"
        );

        if !options.close_on_eose {
            self.live.insert(
                id.clone(),
                LiveSubscription {
                    filters,
                    tx,
                    closed: close_rx,
                },
            );
        }

        Ok(Subscription::new(id, rx, close_tx))
    }
}
