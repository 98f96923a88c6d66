//! WebSocket relay pool.
//!
//! Each subscription fans out to every configured relay over its own
//! connection. Events are de-duplicated by id across relays, and a single
//! end-of-stored-events is reported once every relay has sent its own (or
//! failed). Streaming subscriptions reconnect with exponential backoff until
//! the consumer closes them; one-shot subscriptions never reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use dashmap::DashSet;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::client::newest_stored_event;
use crate::{
    ClientMessage, Event, EventNetworkClient, Filter, NostrError, RelayMessage, SubscribeOptions,
    Subscription, SubscriptionItem,
};

/// Relays used when none are configured.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.primal.net",
];

/// Per-subscription channel capacity.
const CHANNEL_CAPACITY: usize = 4096;

/// Relay pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayPoolConfig {
    /// Relay WebSocket URLs.
    pub relays: Vec<String>,
    /// Upper bound for a point fetch.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
    /// Longest wait between reconnection attempts.
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
}

impl Default for RelayPoolConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            fetch_timeout: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A pool of relays behind the [`EventNetworkClient`] interface.
pub struct RelayPool {
    config: RelayPoolConfig,
}

impl RelayPool {
    /// Create a pool from configuration.
    pub fn new(config: RelayPoolConfig) -> Self {
        Self { config }
    }

    /// Create a pool for the given relay URLs with default timeouts.
    pub fn with_relays<I, S>(relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RelayPoolConfig {
            relays: relays.into_iter().map(Into::into).collect(),
            ..RelayPoolConfig::default()
        })
    }

    /// The configured relay URLs.
    pub fn relays(&self) -> &[String] {
        &self.config.relays
    }
}

#[async_trait]
impl EventNetworkClient for RelayPool {
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscribeOptions,
    ) -> Result<Subscription, NostrError> {
        if self.config.relays.is_empty() {
            return Err(NostrError::Connection("no relays configured".to_string()));
        }

        if let Some(delay) = options.group_delay {
            tokio::time::sleep(delay).await;
        }

        let id = Uuid::new_v4().simple().to_string();
        let request = ClientMessage::Req {
            subscription_id: id.clone(),
            filters,
        }
        .to_json()?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);
        let shared = Arc::new(SharedState {
            seen: DashSet::new(),
            pending_eose: AtomicUsize::new(self.config.relays.len()),
        });

        debug!(
            subscription = %id,
            relays = self.config.relays.len(),
            close_on_eose = options.close_on_eose,
            "opening relay subscription"
        );

        for url in &self.config.relays {
            let worker = RelayWorker {
                url: url.clone(),
                subscription_id: id.clone(),
                request: request.clone(),
                close_on_eose: options.close_on_eose,
                max_backoff: self.config.max_backoff,
                tx: tx.clone(),
                closed: close_rx.clone(),
                shared: Arc::clone(&shared),
            };
            tokio::spawn(worker.run());
        }

        Ok(Subscription::new(id, rx, close_tx))
    }

    async fn fetch_event(&self, filter: Filter) -> Result<Option<Event>, NostrError> {
        let timeout = self.config.fetch_timeout;
        let mut subscription = self.subscribe(vec![filter], SubscribeOptions::one_shot()).await?;

        tokio::time::timeout(timeout, newest_stored_event(&mut subscription))
            .await
            .map_err(|_| NostrError::Timeout(timeout))
    }
}

/// State shared by the workers of one subscription.
struct SharedState {
    /// Event ids already forwarded to the consumer.
    seen: DashSet<String>,
    /// Relays that have not yet sent (or failed before) EOSE.
    pending_eose: AtomicUsize,
}

/// Drives one subscription on one relay.
struct RelayWorker {
    url: String,
    subscription_id: String,
    request: String,
    close_on_eose: bool,
    max_backoff: Duration,
    tx: mpsc::Sender<SubscriptionItem>,
    closed: watch::Receiver<bool>,
    shared: Arc<SharedState>,
}

impl RelayWorker {
    async fn run(mut self) {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: self.max_backoff,
            max_elapsed_time: None, // Retry forever
            ..Default::default()
        };
        let mut eose_seen = false;

        loop {
            if *self.closed.borrow() {
                return;
            }

            match self.connect_and_stream(&mut eose_seen, &mut backoff).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(relay = %self.url, subscription = %self.subscription_id, error = %e, "relay subscription failed");

                    // A dead relay must not hold back EOSE for the others
                    self.mark_eose(&mut eose_seen).await;

                    if self.close_on_eose {
                        return;
                    }

                    let wait = backoff.next_backoff().unwrap_or(self.max_backoff);
                    tokio::select! {
                        changed = self.closed.changed() => {
                            if changed.is_err() || *self.closed.borrow() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Count this relay's EOSE once, emitting the pool-wide EOSE on the last.
    async fn mark_eose(&self, eose_seen: &mut bool) {
        if *eose_seen {
            return;
        }
        *eose_seen = true;
        if self.shared.pending_eose.fetch_sub(1, Ordering::SeqCst) == 1 {
            trace!(subscription = %self.subscription_id, "all relays reached EOSE");
            let _ = self.tx.send(SubscriptionItem::EndOfStoredEvents).await;
        }
    }

    /// Connect, send the request, and forward messages until closed.
    ///
    /// `Ok(())` means the worker is done (consumer closed, or one-shot
    /// finished); errors are retried by the caller.
    async fn connect_and_stream(
        &mut self,
        eose_seen: &mut bool,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), NostrError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| NostrError::Connection(format!("{}: {}", self.url, e)))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::text(self.request.clone()))
            .await
            .map_err(|e| NostrError::WebSocket(format!("send REQ failed: {e}")))?;

        info!(relay = %self.url, subscription = %self.subscription_id, "relay subscription sent");
        backoff.reset();

        let close_message = ClientMessage::Close {
            subscription_id: self.subscription_id.clone(),
        }
        .to_json()?;

        loop {
            tokio::select! {
                biased;

                changed = self.closed.changed() => {
                    if changed.is_err() || *self.closed.borrow() {
                        debug!(relay = %self.url, subscription = %self.subscription_id, "closing relay subscription");
                        let _ = write.send(Message::text(close_message.clone())).await;
                        let _ = write.close().await;
                        return Ok(());
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text, eose_seen).await? {
                                let _ = write.send(Message::text(close_message.clone())).await;
                                let _ = write.close().await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(NostrError::WebSocket("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(NostrError::WebSocket(format!("read error: {e}")));
                        }
                    }
                }
            }
        }
    }

    /// Handle one text frame. Returns `true` when the worker should stop.
    async fn handle_text(&self, text: &str, eose_seen: &mut bool) -> Result<bool, NostrError> {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                trace!(relay = %self.url, error = %e, "ignoring relay message");
                return Ok(false);
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } if subscription_id == self.subscription_id => {
                if self.shared.seen.insert(event.id.clone())
                    && self.tx.send(SubscriptionItem::Event(event)).await.is_err()
                {
                    // Consumer went away
                    return Ok(true);
                }
                Ok(false)
            }
            RelayMessage::EndOfStoredEvents { subscription_id }
                if subscription_id == self.subscription_id =>
            {
                self.mark_eose(eose_seen).await;
                Ok(self.close_on_eose)
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } if subscription_id == self.subscription_id => Err(NostrError::Closed {
                id: subscription_id,
                reason: message,
            }),
            RelayMessage::Notice { message } => {
                debug!(relay = %self.url, notice = %message, "relay notice");
                Ok(false)
            }
            other => {
                trace!(relay = %self.url, message = ?other, "ignoring relay message");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayPoolConfig::default();
        assert_eq!(config.relays.len(), DEFAULT_RELAYS.len());
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_from_json() {
        let config: RelayPoolConfig =
            serde_json::from_str(r#"{"relays":["wss://a"],"fetch_timeout":3}"#).unwrap();
        assert_eq!(config.relays, vec!["wss://a".to_string()]);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_no_relays_is_an_error() {
        let pool = RelayPool::with_relays(Vec::<String>::new());
        let result = pool
            .subscribe(vec![Filter::new()], SubscribeOptions::one_shot())
            .await;
        assert!(matches!(result, Err(NostrError::Connection(_))));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_eose_and_ends() {
        // Nothing listens on port 1; the one-shot worker fails, reports EOSE
        // for its relay, and exits, which ends the subscription.
        let pool = RelayPool::with_relays(["ws://127.0.0.1:1"]);
        let mut sub = pool
            .subscribe(vec![Filter::new()], SubscribeOptions::one_shot())
            .await
            .unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionItem::EndOfStoredEvents));
        assert_eq!(sub.next().await, None);
    }
}
