//! Highlights, including boosted ones.

use std::collections::BTreeSet;

use glean_nostr::{EventKind, Filter, MalformedReference, Reference, SubscribeOptions};

use super::{
    Loaded, StreamHandle, newest_first, open_stream, parse_event_ids, parse_pubkeys,
    reference_clause, union,
};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{Highlight, index};

/// What to load. Every option given is one more ANDed clause.
#[derive(Debug, Clone, Default)]
pub struct HighlightOptions {
    article: Option<String>,
    authors: Vec<String>,
    ids: Vec<String>,
    url: Option<String>,
    limit: Option<usize>,
}

impl HighlightOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highlights of an article, given as `naddr`, event id or URL.
    pub fn article(mut self, reference: impl Into<String>) -> Self {
        self.article = Some(reference.into());
        self
    }

    /// Highlights made or boosted by this key (`npub` or hex).
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

    /// Highlights taken from this page.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn resolve(&self) -> Result<HighlightQuery, MalformedReference> {
        Ok(HighlightQuery {
            article: self.article.as_deref().map(Reference::parse).transpose()?,
            authors: parse_pubkeys(&self.authors)?,
            ids: parse_event_ids(&self.ids)?,
            url: self.url.clone(),
            limit: self.limit,
        })
    }
}

/// Validated options.
#[derive(Debug, Clone)]
struct HighlightQuery {
    article: Option<Reference>,
    authors: BTreeSet<String>,
    ids: BTreeSet<String>,
    url: Option<String>,
    limit: Option<usize>,
}

impl HighlightQuery {
    fn highlight_filter(&self) -> Filter {
        let mut filter = Filter::new().kinds([EventKind::Highlight.as_u16()]);
        if let Some(article) = &self.article {
            filter = reference_clause(filter, article);
        }
        if let Some(url) = &self.url {
            filter = filter.tag('r', [url.clone()]);
        }
        self.common_clauses(filter)
    }

    /// Boosts are worth listening for when the request is about people
    /// rather than one article or page.
    fn boost_filter(&self) -> Option<Filter> {
        let scoped = self.article.is_some() || self.url.is_some();
        if scoped && self.authors.is_empty() {
            return None;
        }
        let filter = Filter::new()
            .kinds([EventKind::GenericRepost.as_u16()])
            .tag('k', [EventKind::Highlight.as_u16().to_string()]);
        Some(self.common_clauses(filter))
    }

    fn common_clauses(&self, mut filter: Filter) -> Filter {
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().cloned());
        }
        if !self.ids.is_empty() {
            filter = filter.ids(self.ids.iter().cloned());
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }

    fn matches(&self, highlight: &Highlight) -> bool {
        let article_ok = match &self.article {
            None => true,
            Some(Reference::Url(url)) => highlight.is_from(url),
            Some(reference) => highlight.is_about(&reference.query_key()),
        };
        let url_ok = self.url.as_ref().is_none_or(|url| highlight.is_from(url));
        let author_ok = self.authors.is_empty()
            || self.authors.contains(&highlight.pubkey)
            || highlight
                .boosted_by
                .as_ref()
                .is_some_and(|booster| self.authors.contains(booster));
        let id_ok = self.ids.is_empty() || self.ids.contains(&highlight.id);

        article_ok && url_ok && author_ok && id_ok
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<Highlight>, StoreFault> {
        let candidates = if !self.ids.is_empty() {
            let ids: Vec<String> = self.ids.iter().cloned().collect();
            scope.by_ids::<Highlight>(&ids)?
        } else if let Some(article) = &self.article {
            match article {
                Reference::Url(url) => scope.by_index(index::URL, url)?,
                other => scope.by_index(index::ARTICLE, &other.query_key())?,
            }
        } else if let Some(url) = &self.url {
            scope.by_index(index::URL, url)?
        } else if !self.authors.is_empty() {
            let mut batches = Vec::new();
            for author in &self.authors {
                batches.push(scope.by_index::<Highlight>(index::PUBKEY, author)?);
            }
            union(batches)
        } else {
            scope.all()?
        };

        let matching: Vec<Highlight> =
            candidates.into_iter().filter(|h| self.matches(h)).collect();
        Ok(newest_first(matching, |h: &Highlight| h.timestamp, self.limit))
    }
}

/// Loads highlights and keeps them fresh.
#[derive(Clone)]
pub struct HighlightManager {
    ctx: SyncContext,
}

impl HighlightManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Open the network subscriptions for `options` without a live query.
    pub async fn start_stream(
        &self,
        options: &HighlightOptions,
    ) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        Ok(self.open(&query).await)
    }

    /// Live highlights matching `options`, newest first.
    pub async fn load(
        &self,
        options: HighlightOptions,
    ) -> Result<Loaded<Vec<Highlight>>, CacheError> {
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

    async fn open(&self, query: &HighlightQuery) -> Vec<StreamHandle> {
        let mut streams = Vec::new();
        streams.extend(
            open_stream(
                &self.ctx,
                "highlights",
                vec![query.highlight_filter()],
                SubscribeOptions::streaming(),
            )
            .await,
        );
        if let Some(boosts) = query.boost_filter() {
            streams.extend(
                open_stream(
                    &self.ctx,
                    "highlight-boosts",
                    vec![boosts],
                    SubscribeOptions::streaming(),
                )
                .await,
            );
        }
        streams
    }
}
