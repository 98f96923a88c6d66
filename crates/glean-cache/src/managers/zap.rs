//! Zap receipts.

use glean_nostr::{EventKind, Filter, MalformedReference, SubscribeOptions, decode_npub};

use super::{Loaded, StreamHandle, newest_first, open_stream, parse_event_id};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{Zap, index};

#[derive(Debug, Clone, Default)]
pub struct ZapOptions {
    payee: Option<String>,
    zapped_note: Option<String>,
}

impl ZapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zaps paid to this key.
    pub fn payee(mut self, pubkey: impl Into<String>) -> Self {
        self.payee = Some(pubkey.into());
        self
    }

    /// Zaps paid for this event.
    pub fn zapped_note(mut self, id: impl Into<String>) -> Self {
        self.zapped_note = Some(id.into());
        self
    }

    fn resolve(&self) -> Result<ZapQuery, MalformedReference> {
        Ok(ZapQuery {
            payee: self.payee.as_deref().map(decode_npub).transpose()?,
            zapped_note: self.zapped_note.as_deref().map(parse_event_id).transpose()?,
        })
    }
}

#[derive(Debug, Clone)]
struct ZapQuery {
    payee: Option<String>,
    zapped_note: Option<String>,
}

impl ZapQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::new().kinds([EventKind::ZapReceipt.as_u16()]);
        if let Some(payee) = &self.payee {
            filter = filter.tag('p', [payee.clone()]);
        }
        if let Some(note) = &self.zapped_note {
            filter = filter.tag('e', [note.clone()]);
        }
        filter
    }

    fn matches(&self, zap: &Zap) -> bool {
        self.payee.as_ref().is_none_or(|p| &zap.payee == p)
            && self.zapped_note.as_ref().is_none_or(|n| zap.pays_for(n))
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<Zap>, StoreFault> {
        let candidates: Vec<Zap> = if let Some(note) = &self.zapped_note {
            scope.by_index(index::ZAPPED_NOTE, note)?
        } else if let Some(payee) = &self.payee {
            scope.by_index(index::PAYEE, payee)?
        } else {
            scope.all()?
        };

        let matching = candidates.into_iter().filter(|z| self.matches(z)).collect();
        Ok(newest_first(matching, |z: &Zap| z.created_at, None))
    }
}

/// Loads zap receipts and keeps them fresh.
#[derive(Clone)]
pub struct ZapManager {
    ctx: SyncContext,
}

impl ZapManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn start_stream(&self, options: &ZapOptions) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        Ok(self.open(&query).await)
    }

    pub async fn load(&self, options: ZapOptions) -> Result<Loaded<Vec<Zap>>, CacheError> {
        let query = options.resolve()?;

        let live = {
            let query = query.clone();
            self.ctx.live().subscribe(move |scope| query.evaluate(scope))
        };
        let streams = self.open(&query).await;

        Ok(Loaded {
            query: live,
            streams,
        })
    }

    async fn open(&self, query: &ZapQuery) -> Vec<StreamHandle> {
        open_stream(
            &self.ctx,
            "zaps",
            vec![query.filter()],
            SubscribeOptions::streaming(),
        )
        .await
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOB: &str = "b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0";

    #[test]
    fn test_payee_and_note_filter() {
        let note = "cd".repeat(32);
        let query = ZapOptions::new()
            .payee(BOB)
            .zapped_note(note.clone())
            .resolve()
            .unwrap();
        assert_eq!(
            serde_json::to_string(&query.filter()).unwrap(),
            format!(r##"{{"kinds":[9735],"#e":["{note}"],"#p":["{BOB}"]}}"##)
        );
    }

    #[test]
    fn test_zapped_note_must_be_an_event() {
        assert!(ZapOptions::new()
            .zapped_note("https://example.com")
            .resolve()
            .is_err());
    }
}
