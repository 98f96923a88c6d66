//! Long-form articles.

use std::collections::BTreeSet;

use glean_nostr::{EventKind, Filter, MalformedReference, Reference, SubscribeOptions};

use super::{Loaded, StreamHandle, newest_first, open_stream, parse_pubkeys, union};
use crate::context::SyncContext;
use crate::error::{CacheError, StoreFault};
use crate::live::QueryScope;
use crate::records::{Article, index};

#[derive(Debug, Clone, Default)]
pub struct ArticleOptions {
    reference: Option<String>,
    authors: Vec<String>,
    limit: Option<usize>,
}

impl ArticleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// One article, by `naddr`, query key, event id or URL.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
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

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn resolve(&self) -> Result<ArticleQuery, MalformedReference> {
        Ok(ArticleQuery {
            reference: self.reference.as_deref().map(Reference::parse).transpose()?,
            authors: parse_pubkeys(&self.authors)?,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Clone)]
struct ArticleQuery {
    reference: Option<Reference>,
    authors: BTreeSet<String>,
    limit: Option<usize>,
}

impl ArticleQuery {
    fn filter(&self) -> Filter {
        let mut filter = match &self.reference {
            Some(Reference::Coordinate(c)) => Filter::new()
                .kinds([c.kind])
                .authors([c.pubkey.clone()])
                .tag('d', [c.identifier.clone()]),
            Some(Reference::EventId(id)) => Filter::new()
                .kinds([EventKind::LongFormArticle.as_u16()])
                .ids([id.clone()]),
            Some(Reference::Url(url)) => Filter::new()
                .kinds([EventKind::LongFormArticle.as_u16()])
                .tag('r', [url.clone()]),
            None => Filter::new().kinds([EventKind::LongFormArticle.as_u16()]),
        };
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().cloned());
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }

    fn evaluate(&self, scope: &QueryScope<'_>) -> Result<Vec<Article>, StoreFault> {
        let candidates: Vec<Article> = match &self.reference {
            Some(Reference::Coordinate(c)) => {
                scope.get(&c.query_key())?.into_iter().collect()
            }
            Some(Reference::EventId(id)) => scope.by_index(index::EVENT_ID, id)?,
            Some(Reference::Url(url)) => scope.by_index(index::URL, url)?,
            None if !self.authors.is_empty() => {
                let mut batches = Vec::new();
                for author in &self.authors {
                    batches.push(scope.by_index::<Article>(index::PUBKEY, author)?);
                }
                union(batches)
            }
            None => scope.all()?,
        };

        let matching: Vec<Article> = candidates
            .into_iter()
            .filter(|a| self.authors.is_empty() || self.authors.contains(&a.pubkey))
            .collect();
        Ok(newest_first(matching, |a: &Article| a.created_at, self.limit))
    }
}

/// Loads articles and keeps them fresh.
#[derive(Clone)]
pub struct ArticleManager {
    ctx: SyncContext,
}

impl ArticleManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn start_stream(
        &self,
        options: &ArticleOptions,
    ) -> Result<Vec<StreamHandle>, CacheError> {
        let query = options.resolve()?;
        Ok(self.open(&query).await)
    }

    /// Live articles matching `options`, newest first.
    pub async fn load(&self, options: ArticleOptions) -> Result<Loaded<Vec<Article>>, CacheError> {
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

    async fn open(&self, query: &ArticleQuery) -> Vec<StreamHandle> {
        open_stream(
            &self.ctx,
            "articles",
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

    const ALICE: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";

    #[test]
    fn test_coordinate_filter() {
        let query = ArticleOptions::new()
            .reference(format!("30023:{ALICE}:my-post"))
            .resolve()
            .unwrap();
        assert_eq!(
            serde_json::to_string(&query.filter()).unwrap(),
            format!(r##"{{"authors":["{ALICE}"],"kinds":[30023],"#d":["my-post"]}}"##)
        );
    }

    #[test]
    fn test_malformed_reference() {
        assert!(ArticleOptions::new().reference("naddr1garbage").resolve().is_err());
    }
}
