//! Short text notes.

use std::collections::BTreeSet;

use glean_nostr::{EventKind, Filter, MalformedReference, Reference, SubscribeOptions};
use tracing::debug;

use super::{
    Loaded, StreamHandle, newest_first, open_stream, parse_event_ids, parse_pubkeys,
    reference_clause, union,
};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{Note, index};

#[derive(Debug, Clone, Default)]
pub struct NoteOptions {
    authors: Vec<String>,
    reply_to: Option<String>,
    quote_of: Option<String>,
    ids: Vec<String>,
    limit: Option<usize>,
}

impl NoteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Replies to an event or an article coordinate.
    pub fn reply_to(mut self, reference: impl Into<String>) -> Self {
        self.reply_to = Some(reference.into());
        self
    }

    /// Notes quoting an event.
    pub fn quote_of(mut self, reference: impl Into<String>) -> Self {
        self.quote_of = Some(reference.into());
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

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn resolve(&self) -> Result<NoteQuery, MalformedReference> {
        Ok(NoteQuery {
            authors: parse_pubkeys(&self.authors)?,
            reply_to: self.reply_to.as_deref().map(thread_reference).transpose()?,
            quote_of: self.quote_of.as_deref().map(thread_reference).transpose()?,
            ids: parse_event_ids(&self.ids)?,
            limit: self.limit,
        })
    }
}

/// Notes thread under events and coordinates, never under web pages.
fn thread_reference(input: &str) -> Result<Reference, MalformedReference> {
    match Reference::parse(input)? {
        Reference::Url(_) => Err(MalformedReference {
            input: input.to_string(),
            reason: "expected an event id or coordinate".to_string(),
        }),
        reference => Ok(reference),
    }
}

#[derive(Debug, Clone)]
struct NoteQuery {
    authors: BTreeSet<String>,
    reply_to: Option<Reference>,
    quote_of: Option<Reference>,
    ids: BTreeSet<String>,
    limit: Option<usize>,
}

impl NoteQuery {
    fn filter(&self, ids: &[String]) -> Filter {
        let mut filter = Filter::new().kinds([EventKind::TextNote.as_u16()]);
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().cloned());
        }
        if let Some(reply_to) = &self.reply_to {
            filter = reference_clause(filter, reply_to);
        }
        if let Some(quote_of) = &self.quote_of {
            filter = filter.tag('q', [quote_of.query_key()]);
        }
        if !ids.is_empty() {
            filter = filter.ids(ids.iter().cloned());
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }

    fn matches(&self, note: &Note) -> bool {
        (self.authors.is_empty() || self.authors.contains(&note.pubkey))
            && self
                .reply_to
                .as_ref()
                .is_none_or(|r| note.is_reply_to(&r.query_key()))
            && self
                .quote_of
                .as_ref()
                .is_none_or(|q| note.is_quote_of(&q.query_key()))
            && (self.ids.is_empty() || self.ids.contains(&note.id))
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<Note>, StoreFault> {
        let candidates = if !self.ids.is_empty() {
            let ids: Vec<String> = self.ids.iter().cloned().collect();
            scope.by_ids::<Note>(&ids)?
        } else if let Some(reply_to) = &self.reply_to {
            scope.by_index(index::REPLY_TO, &reply_to.query_key())?
        } else if let Some(quote_of) = &self.quote_of {
            scope.by_index(index::QUOTE_OF, &quote_of.query_key())?
        } else if !self.authors.is_empty() {
            let mut batches = Vec::new();
            for author in &self.authors {
                batches.push(scope.by_index::<Note>(index::PUBKEY, author)?);
            }
            union(batches)
        } else {
            scope.all()?
        };

        let matching: Vec<Note> = candidates.into_iter().filter(|n| self.matches(n)).collect();
        Ok(newest_first(matching, |n: &Note| n.created_at, self.limit))
    }
}

/// Loads notes and keeps them fresh.
#[derive(Clone)]
pub struct NoteManager {
    ctx: SyncContext,
}

impl NoteManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn start_stream(&self, options: &NoteOptions) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        self.open(&query).await
    }

    /// Live notes matching `options`, newest first.
    ///
    /// With an id set, only ids missing from the store are requested, and
    /// nothing is requested when all of them are cached.
    pub async fn load(&self, options: NoteOptions) -> Result<Loaded<Vec<Note>>, CacheError> {
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

    async fn open(&self, query: &NoteQuery) -> Result<Vec<StreamHandle>, CacheError> {
        if query.ids.is_empty() {
            let stream = open_stream(
                &self.ctx,
                "notes",
                vec![query.filter(&[])],
                SubscribeOptions::streaming(),
            )
            .await;
            return Ok(stream.into_iter().collect());
        }

        let mut missing = Vec::new();
        for id in &query.ids {
            if !self.ctx.store().contains::<Note>(id)? {
                missing.push(id.clone());
            }
        }
        if missing.is_empty() {
            debug!(requested = query.ids.len(), "all requested notes are cached");
            return Ok(Vec::new());
        }

        debug!(requested = query.ids.len(), missing = missing.len(), "fetching missing notes");
        let stream = open_stream(
            &self.ctx,
            "notes-by-id",
            vec![query.filter(&missing)],
            SubscribeOptions::one_shot(),
        )
        .await;
        Ok(stream.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";

    #[test]
    fn test_reply_to_coordinate_uses_a_tag() {
        let key = format!("30023:{ALICE}:post");
        let query = NoteOptions::new().reply_to(key.clone()).resolve().unwrap();
        assert_eq!(
            serde_json::to_string(&query.filter(&[])).unwrap(),
            format!(r##"{{"kinds":[1],"#a":["{key}"]}}"##)
        );
    }

    #[test]
    fn test_reply_to_url_is_rejected() {
        let err = NoteOptions::new()
            .reply_to("https://example.com")
            .resolve()
            .unwrap_err();
        assert_eq!(err.input, "https://example.com");
    }

    #[test]
    fn test_matches_quote() {
        let quoted = "cd".repeat(32);
        let query = NoteOptions::new().quote_of(quoted.clone()).resolve().unwrap();
        let mut note = Note {
            id: "n".to_string(),
            pubkey: ALICE.to_string(),
            content: String::new(),
            reply_to: None,
            quote_of: Some(quoted),
            created_at: 0,
            event: String::new(),
            thread: Vec::new(),
            quotes: Vec::new(),
        };
        assert!(query.matches(&note));
        note.quote_of = None;
        assert!(!query.matches(&note));
    }
}
