//! Encrypted direct messages.
//!
//! Conversations are read in thread order, so results here are oldest
//! first. Payloads stay encrypted.

use std::collections::BTreeSet;

use glean_nostr::{EventKind, Filter, MalformedReference, SubscribeOptions, decode_npub};
use tracing::debug;

use super::{Loaded, StreamHandle, open_stream, parse_event_id, parse_event_ids, union};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{EncryptedNote, index};

#[derive(Debug, Clone, Default)]
pub struct EncryptedNoteOptions {
    pubkey: Option<String>,
    reply_to: Option<String>,
    ids: Vec<String>,
}

impl EncryptedNoteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent by or to this key.
    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkey = Some(pubkey.into());
        self
    }

    /// Messages replying to this event.
    pub fn reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    fn resolve(&self) -> Result<EncryptedQuery, MalformedReference> {
        Ok(EncryptedQuery {
            pubkey: self.pubkey.as_deref().map(decode_npub).transpose()?,
            reply_to: self.reply_to.as_deref().map(parse_event_id).transpose()?,
            ids: parse_event_ids(&self.ids)?,
        })
    }
}

#[derive(Debug, Clone)]
struct EncryptedQuery {
    pubkey: Option<String>,
    reply_to: Option<String>,
    ids: BTreeSet<String>,
}

impl EncryptedQuery {
    /// One filter per direction when scoped to a key.
    fn filters(&self, ids: &[String]) -> Vec<Filter> {
        let base = || {
            let mut filter = Filter::new().kinds([EventKind::EncryptedDirectMessage.as_u16()]);
            if let Some(reply_to) = &self.reply_to {
                filter = filter.tag('e', [reply_to.clone()]);
            }
            if !ids.is_empty() {
                filter = filter.ids(ids.iter().cloned());
            }
            filter
        };

        match &self.pubkey {
            Some(pubkey) => vec![
                base().authors([pubkey.clone()]),
                base().tag('p', [pubkey.clone()]),
            ],
            None => vec![base()],
        }
    }

    fn matches(&self, note: &EncryptedNote) -> bool {
        self.pubkey
            .as_ref()
            .is_none_or(|pk| &note.pubkey == pk || &note.recipient == pk)
            && self
                .reply_to
                .as_ref()
                .is_none_or(|r| note.is_reply_to(r))
            && (self.ids.is_empty() || self.ids.contains(&note.id))
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<EncryptedNote>, StoreFault> {
        let candidates: Vec<EncryptedNote> = if !self.ids.is_empty() {
            let ids: Vec<String> = self.ids.iter().cloned().collect();
            scope.by_ids(&ids)?
        } else if let Some(reply_to) = &self.reply_to {
            scope.by_index(index::REPLY_TO, reply_to)?
        } else if let Some(pubkey) = &self.pubkey {
            union([
                scope.by_index(index::PUBKEY, pubkey)?,
                scope.by_index(index::RECIPIENT, pubkey)?,
            ])
        } else {
            scope.all()?
        };

        let mut matching: Vec<EncryptedNote> =
            candidates.into_iter().filter(|n| self.matches(n)).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

/// Loads encrypted direct messages and keeps them fresh.
#[derive(Clone)]
pub struct EncryptedNoteManager {
    ctx: SyncContext,
}

impl EncryptedNoteManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn start_stream(
        &self,
        options: &EncryptedNoteOptions,
    ) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        self.open(&query).await
    }

    /// Live messages matching `options`, oldest first.
    pub async fn load(
        &self,
        options: EncryptedNoteOptions,
    ) -> Result<Loaded<Vec<EncryptedNote>>, CacheError> {
        let query = options.resolve()?;

        let live = {
            let query = query.clone();
            self.ctx.live().subscribe(move |scope| query.evaluate(scope))
        };
        let streams = self.open(&query).await?;

        Ok(Loaded {
            query: live,
            streams,
        })
    }

    async fn open(&self, query: &EncryptedQuery) -> Result<Vec<StreamHandle>, CacheError> {
        if query.ids.is_empty() {
            let stream = open_stream(
                &self.ctx,
                "encrypted-notes",
                query.filters(&[]),
                SubscribeOptions::streaming(),
            )
            .await;
            return Ok(stream.into_iter().collect());
        }

        let mut missing = Vec::new();
        for id in &query.ids {
            if !self.ctx.store().contains::<EncryptedNote>(id)? {
                missing.push(id.clone());
            }
        }
        if missing.is_empty() {
            debug!(requested = query.ids.len(), "all requested messages are cached");
            return Ok(Vec::new());
        }

        let stream = open_stream(
            &self.ctx,
            "encrypted-notes-by-id",
            query.filters(&missing),
            SubscribeOptions::one_shot(),
        )
        .await;
        Ok(stream.into_iter().collect())
    }
}
