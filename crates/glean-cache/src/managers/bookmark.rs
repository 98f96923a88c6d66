//! Bookmark lists.

use std::collections::BTreeSet;

use glean_nostr::{Coordinate, EventKind, Filter, MalformedReference, Reference, SubscribeOptions};

use super::{Loaded, StreamHandle, newest_first, open_stream, parse_pubkeys, union};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{BookmarkList, index};

const LIST_KINDS: [EventKind; 2] = [EventKind::BookmarkList, EventKind::BookmarkSet];

#[derive(Debug, Clone, Default)]
pub struct BookmarkListOptions {
    authors: Vec<String>,
    reference: Option<String>,
}

impl BookmarkListOptions {
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

    /// One list, by `naddr` or query key.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    fn resolve(&self) -> Result<BookmarkQuery, MalformedReference> {
        let coordinate = match self.reference.as_deref() {
            None => None,
            Some(input) => match Reference::parse(input)? {
                Reference::Coordinate(c) => Some(c),
                _ => {
                    return Err(MalformedReference {
                        input: input.to_string(),
                        reason: "bookmark lists are addressed by coordinate".to_string(),
                    });
                }
            },
        };

        Ok(BookmarkQuery {
            authors: parse_pubkeys(&self.authors)?,
            coordinate,
        })
    }
}

#[derive(Debug, Clone)]
struct BookmarkQuery {
    authors: BTreeSet<String>,
    coordinate: Option<Coordinate>,
}

impl BookmarkQuery {
    fn filter(&self) -> Filter {
        let mut filter = match &self.coordinate {
            Some(c) => Filter::new()
                .kinds([c.kind])
                .authors([c.pubkey.clone()])
                .tag('d', [c.identifier.clone()]),
            None => Filter::new().kinds(LIST_KINDS.map(EventKind::as_u16)),
        };
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().cloned());
        }
        filter
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<BookmarkList>, StoreFault> {
        let candidates: Vec<BookmarkList> = if let Some(c) = &self.coordinate {
            scope.get(&c.query_key())?.into_iter().collect()
        } else if !self.authors.is_empty() {
            let mut batches = Vec::new();
            for author in &self.authors {
                batches.push(scope.by_index::<BookmarkList>(index::PUBKEY, author)?);
            }
            union(batches)
        } else {
            scope.all()?
        };

        let matching = candidates
            .into_iter()
            .filter(|list| self.authors.is_empty() || self.authors.contains(&list.pubkey))
            .collect();
        Ok(newest_first(matching, |l: &BookmarkList| l.created_at, None))
    }
}

/// Loads bookmark lists and keeps them fresh.
#[derive(Clone)]
pub struct BookmarkListManager {
    ctx: SyncContext,
}

impl BookmarkListManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn start_stream(
        &self,
        options: &BookmarkListOptions,
    ) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        Ok(self.open(&query).await)
    }

    pub async fn load(
        &self,
        options: BookmarkListOptions,
    ) -> Result<Loaded<Vec<BookmarkList>>, CacheError> {
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

    async fn open(&self, query: &BookmarkQuery) -> Vec<StreamHandle> {
        open_stream(
            &self.ctx,
            "bookmark-lists",
            vec![query.filter()],
            SubscribeOptions::streaming(),
        )
        .await
        .into_iter()
        .collect()
    }
}
