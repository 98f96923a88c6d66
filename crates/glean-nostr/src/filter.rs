//! NIP-01 subscription filters.
//!
//! A filter is a set of clauses that a relay ANDs together: an event matches
//! when it satisfies every clause that is present. Within one clause the
//! listed values are alternatives.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::Event;

/// A subscription filter, built up clause by clause.
///
/// # Example
///
/// ```
/// use glean_nostr::Filter;
///
/// let filter = Filter::new()
///     .kinds([9802])
///     .tag('r', ["https://example.com/post"])
///     .limit(50);
/// assert_eq!(
///     serde_json::to_string(&filter).unwrap(),
///     r##"{"kinds":[9802],"#r":["https://example.com/post"],"limit":50}"##
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authors: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kinds: Option<BTreeSet<u16>>,
    /// Tag clauses keyed by `#<letter>`.
    #[serde(flatten)]
    tags: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

impl Filter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these event ids. Repeated calls extend the clause.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .get_or_insert_with(BTreeSet::new)
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Restrict to these authors. Repeated calls extend the clause.
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .extend(authors.into_iter().map(Into::into));
        self
    }

    /// Restrict to these kinds. Repeated calls extend the clause.
    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Require a `letter` tag carrying one of `values`.
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(format!("#{letter}"))
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Only events created at or after `since`.
    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    /// Only events created at or before `until`.
    pub fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }

    /// Ask for at most `limit` stored events.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The requested result limit, if any.
    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    /// The kinds clause, if any.
    pub fn kind_set(&self) -> Option<&BTreeSet<u16>> {
        self.kinds.as_ref()
    }

    /// Whether `event` satisfies every clause of this filter.
    ///
    /// `limit` only bounds stored results and is not a matching clause.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(key, values)| {
            let letter = key.trim_start_matches('#');
            event.tags.iter().any(|tag| {
                tag.first().map(String::as_str) == Some(letter)
                    && tag.get(1).is_some_and(|v| values.contains(v))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(kind: u16, pubkey: &str, tags: &[(&str, &str)]) -> Event {
        Event {
            id: format!("{kind}-{pubkey}"),
            pubkey: pubkey.to_string(),
            created_at: 100,
            kind,
            tags: tags
                .iter()
                .map(|(k, v)| vec![k.to_string(), v.to_string()])
                .collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_serialize_omits_absent_clauses() {
        assert_eq!(serde_json::to_string(&Filter::new()).unwrap(), "{}");
    }

    #[test]
    fn test_serialize_full_filter() {
        let filter = Filter::new()
            .ids(["b", "a"])
            .authors(["pk"])
            .kinds([9802, 16])
            .tag('a', ["30023:pk:slug"])
            .tag('k', ["9802"])
            .since(10)
            .limit(5);
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r##"{"ids":["a","b"],"authors":["pk"],"kinds":[16,9802],"#a":["30023:pk:slug"],"#k":["9802"],"since":10,"limit":5}"##
        );
    }

    #[test]
    fn test_repeated_calls_extend_clause() {
        let filter = Filter::new().authors(["a"]).authors(["b"]);
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r#"{"authors":["a","b"]}"#
        );
    }

    #[test]
    fn test_matches_ands_clauses() {
        let filter = Filter::new().kinds([9802]).authors(["alice"]);
        assert!(filter.matches(&event(9802, "alice", &[])));
        assert!(!filter.matches(&event(9802, "bob", &[])));
        assert!(!filter.matches(&event(1, "alice", &[])));
    }

    #[test]
    fn test_matches_tag_clause() {
        let filter = Filter::new().tag('r', ["https://a.org", "https://b.org"]);
        assert!(filter.matches(&event(9802, "x", &[("r", "https://b.org")])));
        assert!(!filter.matches(&event(9802, "x", &[("r", "https://c.org")])));
        assert!(!filter.matches(&event(9802, "x", &[])));
    }

    #[test]
    fn test_matches_time_bounds() {
        let e = event(1, "x", &[]);
        assert!(Filter::new().since(100).matches(&e));
        assert!(!Filter::new().since(101).matches(&e));
        assert!(Filter::new().until(100).matches(&e));
        assert!(!Filter::new().until(99).matches(&e));
    }

    #[test]
    fn test_empty_id_clause_matches_nothing() {
        let filter = Filter::new().ids(Vec::<String>::new());
        assert!(!filter.matches(&event(1, "x", &[])));
    }
}
