//! User profiles.
//!
//! A profile missing from the store is fetched once; after that the live
//! query alone serves it. When the network has no profile for a key, a
//! placeholder without metadata is stored so the key is not fetched again.

use glean_nostr::{EventKind, Filter, SubscribeOptions, decode_npub};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::{IngestStats, Loaded, StreamHandle, open_stream, parse_pubkeys};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::normalize::Normalized;
use crate::record_store::PutOutcome;
use crate::records::UserProfile;

/// Loads profiles and keeps them fresh.
#[derive(Clone)]
pub struct ProfileManager {
    ctx: SyncContext,
}

impl ProfileManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Stream profile updates for these keys.
    pub async fn start_stream(&self, pubkeys: &[String]) -> Result<Vec<StreamHandle>, CacheError> {
        let authors = parse_pubkeys(pubkeys)?;
        let filter = Filter::new()
            .kinds([EventKind::Metadata.as_u16()])
            .authors(authors);
        Ok(open_stream(&self.ctx, "profiles", vec![filter], SubscribeOptions::streaming())
            .await
            .into_iter()
            .collect())
    }

    /// The live profile for `pubkey` (`npub` or hex).
    ///
    /// The snapshot is `None` until the profile (or its placeholder) is
    /// stored. The returned streams hold the point fetch, if one was
    /// started; concurrent loads of one key start only one.
    pub async fn load(&self, pubkey: &str) -> Result<Loaded<Option<UserProfile>>, CacheError> {
        let pubkey = decode_npub(pubkey)?;

        let live = {
            let pubkey = pubkey.clone();
            self.ctx
                .live()
                .subscribe(move |scope| scope.get::<UserProfile>(&pubkey))
        };

        let mut streams = Vec::new();
        if !self.ctx.store().contains::<UserProfile>(&pubkey)? {
            if self.ctx.begin_profile_fetch(&pubkey) {
                streams.push(self.spawn_fetch(pubkey));
            } else {
                debug!(pubkey = %pubkey, "profile fetch already in flight");
            }
        }

        Ok(Loaded {
            query: live,
            streams,
        })
    }

    fn spawn_fetch(&self, pubkey: String) -> StreamHandle {
        let (close_tx, close_rx) = watch::channel(false);
        let (loaded_tx, loaded_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(IngestStats::default());
        let subscription_id = format!("profile:{pubkey}");

        let task = tokio::spawn(fetch(
            self.ctx.clone(),
            pubkey,
            close_rx,
            loaded_tx,
            progress_tx,
        ));

        StreamHandle {
            subscription_id,
            label: "profile-fetch",
            close_tx,
            loaded: loaded_rx,
            progress: progress_rx,
            task,
        }
    }
}

async fn fetch(
    ctx: SyncContext,
    pubkey: String,
    mut close_rx: watch::Receiver<bool>,
    loaded_tx: watch::Sender<bool>,
    progress_tx: watch::Sender<IngestStats>,
) -> IngestStats {
    let filter = Filter::new()
        .kinds([EventKind::Metadata.as_u16()])
        .authors([pubkey.clone()])
        .limit(1);

    let fetched = tokio::select! {
        biased;
        _ = close_rx.wait_for(|closed| *closed) => None,
        result = ctx.network().fetch_event(filter) => Some(result),
    };

    let mut stats = IngestStats::default();
    let outcome = match fetched {
        None => {
            debug!(pubkey = %pubkey, "profile fetch cancelled");
            Ok(())
        }
        Some(Err(e)) => {
            warn!(pubkey = %pubkey, error = %e, "profile fetch failed");
            Ok(())
        }
        Some(Ok(event)) => {
            stats.received = usize::from(event.is_some());
            let profile = event.and_then(|event| match ctx.normalizer().normalize(&event) {
                Ok(Some(Normalized::UserProfile(profile))) => Some(profile),
                Ok(_) => None,
                Err(e) => {
                    warn!(pubkey = %pubkey, id = %event.id, error = %e, "unusable profile event");
                    None
                }
            });
            store_profile(&ctx, &pubkey, profile, &mut stats)
        }
    };

    if let Err(fault) = outcome {
        error!(pubkey = %pubkey, error = %fault, "store fault while saving profile");
        stats.fault = Some(fault);
    }

    ctx.end_profile_fetch(&pubkey);
    progress_tx.send_replace(stats.clone());
    loaded_tx.send_replace(true);
    stats
}

fn store_profile(
    ctx: &SyncContext,
    pubkey: &str,
    profile: Option<UserProfile>,
    stats: &mut IngestStats,
) -> Result<(), StoreFault> {
    let profile = profile.unwrap_or_else(|| {
        debug!(pubkey = %pubkey, "no profile on the network; storing placeholder");
        UserProfile::placeholder(pubkey)
    });
    match ctx.store().put(&profile)? {
        PutOutcome::Stored => stats.stored += 1,
        PutOutcome::Stale => stats.skipped += 1,
    }
    Ok(())
}
