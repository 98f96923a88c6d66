//! The event network client seam.
//!
//! Everything above this trait (the cache, its subscription managers) talks
//! to the network only through [`EventNetworkClient`]. Implementations are
//! [`crate::MemoryNetwork`] for tests and offline use, and
//! [`crate::RelayPool`] for real relays.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::{Event, Filter, NostrError};

/// Options for opening a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Close the subscription once every source has sent its stored events.
    pub close_on_eose: bool,
    /// Wait this long before sending the request so that bursts of
    /// subscriptions can be coalesced.
    pub group_delay: Option<Duration>,
}

impl SubscribeOptions {
    /// Keep the subscription open for live events.
    pub fn streaming() -> Self {
        Self {
            close_on_eose: false,
            group_delay: None,
        }
    }

    /// Close after stored events have been delivered.
    pub fn one_shot() -> Self {
        Self {
            close_on_eose: true,
            group_delay: None,
        }
    }

    /// Set the coalescing delay.
    pub fn with_group_delay(mut self, delay: Duration) -> Self {
        self.group_delay = Some(delay);
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::streaming()
    }
}

/// An item delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionItem {
    /// An event matching one of the subscription's filters.
    Event(Box<Event>),
    /// Every source has sent its stored events; later events are live.
    EndOfStoredEvents,
}

/// An open subscription.
///
/// Items arrive in relay order within a subscription; nothing is promised
/// across subscriptions. Dropping the subscription closes it.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    items: mpsc::Receiver<SubscriptionItem>,
    close_tx: watch::Sender<bool>,
}

impl Subscription {
    /// Assemble a subscription from its parts.
    ///
    /// `close_tx` is flipped to `true` when the consumer closes or drops the
    /// subscription; the producer watches it to stop sending.
    pub fn new(
        id: impl Into<String>,
        items: mpsc::Receiver<SubscriptionItem>,
        close_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            items,
            close_tx,
        }
    }

    /// The subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next item. Returns `None` once the subscription ended.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.items.recv().await
    }

    /// Stop receiving events.
    pub fn close(&mut self) {
        if !self.close_tx.send_replace(true) {
            trace!(id = %self.id, "closing subscription");
        }
        self.items.close();
    }

    /// Whether the consumer closed this subscription.
    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}

/// A client for the event network.
#[async_trait]
pub trait EventNetworkClient: Send + Sync {
    /// Open a subscription for events matching any of `filters`.
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscribeOptions,
    ) -> Result<Subscription, NostrError>;

    /// Fetch the newest event matching `filter`, once.
    ///
    /// The default implementation opens a one-shot subscription and keeps
    /// the newest event seen before end-of-stored-events.
    async fn fetch_event(&self, filter: Filter) -> Result<Option<Event>, NostrError> {
        let mut subscription = self.subscribe(vec![filter], SubscribeOptions::one_shot()).await?;
        Ok(newest_stored_event(&mut subscription).await)
    }
}

/// Drain stored events from `subscription` and keep the newest.
///
/// Stops at end-of-stored-events (or when the subscription ends) and closes
/// the subscription.
pub async fn newest_stored_event(subscription: &mut Subscription) -> Option<Event> {
    let mut newest: Option<Event> = None;

    while let Some(item) = subscription.next().await {
        match item {
            SubscriptionItem::Event(event) => {
                if newest
                    .as_ref()
                    .is_none_or(|current| event.created_at > current.created_at)
                {
                    newest = Some(*event);
                }
            }
            SubscriptionItem::EndOfStoredEvents => break,
        }
    }

    subscription.close();
    newest
}
