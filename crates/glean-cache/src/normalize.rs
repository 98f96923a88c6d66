//! Event normalization.
//!
//! Turns raw events into typed records. Normalization is pure: no network
//! or store access. Missing optional tags become `None`; missing required
//! fields fail with [`NormalizationError`]. `Ok(None)` means the event was
//! dropped on purpose (blacklisted, or a zap receipt with no usable
//! invoice).

use std::collections::HashSet;

use chrono::DateTime;
use glean_nostr::{Coordinate, Event, EventKind, marked_value, positional_reply, values_of};
use serde::Deserialize;
use tracing::trace;

use crate::error::NormalizationError;
use crate::invoice;
use crate::records::{
    Article, BookmarkList, EncryptedNote, Highlight, Note, Table, UserProfile, Zap,
};

/// Highlight events known to be spam or abuse.
///
/// There is no deletion protocol, so suppressing ids here is the only
/// way to retract them.
pub const HIGHLIGHT_BLACKLIST: &[&str] = &[
    "0f7ac4ba6e5c2d39a1f84b3e9d2c7a60f1e5b8d4c3a2917e6f5d4c3b2a190817",
    "5c1e7f3a9b2d4c6e8f0a1b3c5d7e9f1a2b4c6d8e0f1a3b5c7d9e1f2a4b6c8d0e",
];

/// The record produced by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Article(Article),
    Highlight(Highlight),
    Note(Note),
    BookmarkList(BookmarkList),
    EncryptedNote(EncryptedNote),
    UserProfile(UserProfile),
    Zap(Zap),
}

impl Normalized {
    /// The table the record belongs to.
    pub fn table(&self) -> Table {
        match self {
            Normalized::Article(_) => Table::Articles,
            Normalized::Highlight(_) => Table::Highlights,
            Normalized::Note(_) => Table::Notes,
            Normalized::BookmarkList(_) => Table::BookmarkLists,
            Normalized::EncryptedNote(_) => Table::EncryptedNotes,
            Normalized::UserProfile(_) => Table::UserProfiles,
            Normalized::Zap(_) => Table::Zaps,
        }
    }

    /// The record's identifier.
    pub fn id(&self) -> &str {
        match self {
            Normalized::Article(r) => &r.id,
            Normalized::Highlight(r) => &r.id,
            Normalized::Note(r) => &r.id,
            Normalized::BookmarkList(r) => &r.id,
            Normalized::EncryptedNote(r) => &r.id,
            Normalized::UserProfile(r) => &r.id,
            Normalized::Zap(r) => &r.id,
        }
    }
}

/// Maps events to records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    client_name: String,
    blacklist: HashSet<String>,
}

impl Normalizer {
    /// A normalizer for an application identifying itself as `client_name`.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            blacklist: HIGHLIGHT_BLACKLIST.iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Suppress additional event ids.
    pub fn with_blacklisted<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Whether `id` is suppressed.
    pub fn is_blacklisted(&self, id: &str) -> bool {
        self.blacklist.contains(id)
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Normalize one event.
    pub fn normalize(&self, event: &Event) -> Result<Option<Normalized>, NormalizationError> {
        if self.is_blacklisted(&event.id) {
            trace!(id = %event.id, "dropping blacklisted event");
            return Ok(None);
        }

        match event.event_kind() {
            EventKind::Metadata => profile(event).map(|r| Some(Normalized::UserProfile(r))),
            EventKind::TextNote => note(event).map(|r| Some(Normalized::Note(r))),
            EventKind::EncryptedDirectMessage => self
                .encrypted_note(event)
                .map(|r| Some(Normalized::EncryptedNote(r))),
            EventKind::Repost | EventKind::GenericRepost => self.boost(event),
            EventKind::ZapReceipt => zap(event).map(|r| r.map(Normalized::Zap)),
            EventKind::Highlight => highlight(event).map(|r| Some(Normalized::Highlight(r))),
            EventKind::BookmarkList | EventKind::BookmarkSet => {
                bookmark_list(event).map(|r| Some(Normalized::BookmarkList(r)))
            }
            EventKind::LongFormArticle => article(event).map(|r| Some(Normalized::Article(r))),
            EventKind::ZapRequest | EventKind::Other(_) => {
                Err(NormalizationError::UnsupportedKind {
                    id: event.id.clone(),
                    kind: event.kind,
                })
            }
        }
    }

    /// Normalize the embedded event, then attribute it to the booster.
    fn boost(&self, event: &Event) -> Result<Option<Normalized>, NormalizationError> {
        let wrap = |source: NormalizationError| NormalizationError::Boost {
            id: event.id.clone(),
            source: Box::new(source),
        };

        if event.content.trim().is_empty() {
            return Err(wrap(NormalizationError::InvalidField {
                id: event.id.clone(),
                field: "content",
                reason: "no embedded event".to_string(),
            }));
        }
        let embedded = Event::from_json(&event.content).map_err(|e| {
            wrap(NormalizationError::InvalidField {
                id: event.id.clone(),
                field: "content",
                reason: e.to_string(),
            })
        })?;

        if matches!(
            embedded.event_kind(),
            EventKind::Repost | EventKind::GenericRepost
        ) {
            return Err(wrap(NormalizationError::InvalidField {
                id: embedded.id,
                field: "kind",
                reason: "boost of a boost".to_string(),
            }));
        }

        match self.normalize(&embedded).map_err(wrap)? {
            Some(Normalized::Highlight(mut highlight)) => {
                highlight.id = event.id.clone();
                highlight.boosted_by = Some(event.pubkey.clone());
                Ok(Some(Normalized::Highlight(highlight)))
            }
            Some(other) => Err(wrap(NormalizationError::UnsupportedKind {
                id: other.id().to_string(),
                kind: embedded.kind,
            })),
            None => Ok(None),
        }
    }

    fn encrypted_note(&self, event: &Event) -> Result<EncryptedNote, NormalizationError> {
        let recipient = required_tag(event, "p")?;
        Ok(EncryptedNote {
            id: event.id.clone(),
            pubkey: event.pubkey.clone(),
            recipient,
            content: event.content.clone(),
            reply_to: optional_tag(event, "e"),
            own_client: event.tag("client") == Some(self.client_name.as_str()),
            created_at: event.created_at,
            event: provenance(event)?,
            thread: all_tags(event, &["e"]),
        })
    }
}

fn provenance(event: &Event) -> Result<String, NormalizationError> {
    event
        .to_json()
        .map_err(|e| NormalizationError::InvalidField {
            id: event.id.clone(),
            field: "event",
            reason: e.to_string(),
        })
}

fn optional_tag(event: &Event, key: &str) -> Option<String> {
    event.tag(key).map(str::to_string)
}

fn all_tags(event: &Event, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .flat_map(|key| values_of(&event.tags, key))
        .map(str::to_string)
        .collect()
}

fn required_tag(event: &Event, key: &'static str) -> Result<String, NormalizationError> {
    optional_tag(event, key).ok_or_else(|| NormalizationError::MissingTag {
        id: event.id.clone(),
        tag: key,
    })
}

fn encode_coordinate(event: &Event, coordinate: &Coordinate) -> Result<String, NormalizationError> {
    coordinate
        .encode()
        .map_err(|e| NormalizationError::InvalidField {
            id: event.id.clone(),
            field: "pubkey",
            reason: e.reason,
        })
}

/// Kind 30023.
pub fn article(event: &Event) -> Result<Article, NormalizationError> {
    let coordinate = Coordinate::new(event.kind, &event.pubkey, event.identifier());
    let url = match event.tag("url").or_else(|| event.tag("r")) {
        Some(url) => url.to_string(),
        None => encode_coordinate(event, &coordinate)?,
    };
    let published_at = event
        .tag("published_at")
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Ok(Article {
        id: coordinate.query_key(),
        url,
        title: event.tag("title").unwrap_or_default().to_string(),
        pubkey: event.pubkey.clone(),
        tags: values_of(&event.tags, "t")
            .into_iter()
            .map(str::to_string)
            .collect(),
        content: event.content.clone(),
        author: optional_tag(event, "author"),
        published_at,
        created_at: event.created_at,
        event: provenance(event)?,
        event_id: event.id.clone(),
        urls: all_tags(event, &["url", "r"]),
    })
}

/// Kind 9802.
pub fn highlight(event: &Event) -> Result<Highlight, NormalizationError> {
    Ok(Highlight {
        id: event.id.clone(),
        url: optional_tag(event, "r"),
        pubkey: event.pubkey.clone(),
        content: event.content.clone(),
        context: optional_tag(event, "context"),
        article_id: optional_tag(event, "a").or_else(|| optional_tag(event, "e")),
        boosted_by: None,
        timestamp: event.created_at,
        event: provenance(event)?,
        articles: all_tags(event, &["a", "e"]),
        urls: all_tags(event, &["r"]),
    })
}

/// Kind 1.
pub fn note(event: &Event) -> Result<Note, NormalizationError> {
    let reply_to = marked_value(&event.tags, "e", "reply")
        .or_else(|| marked_value(&event.tags, "e", "root"))
        .or_else(|| positional_reply(&event.tags))
        .or_else(|| event.tag("a"))
        .map(str::to_string);

    Ok(Note {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        content: event.content.clone(),
        reply_to,
        quote_of: optional_tag(event, "q"),
        created_at: event.created_at,
        event: provenance(event)?,
        thread: all_tags(event, &["e", "a"]),
        quotes: all_tags(event, &["q"]),
    })
}

/// Kinds 30001 and 30003.
pub fn bookmark_list(event: &Event) -> Result<BookmarkList, NormalizationError> {
    let title = event
        .tag("title")
        .or_else(|| event.tag("name"))
        .ok_or_else(|| NormalizationError::MissingTag {
            id: event.id.clone(),
            tag: "title",
        })?
        .to_string();
    let coordinate = Coordinate::new(event.kind, &event.pubkey, event.identifier());

    Ok(BookmarkList {
        id: coordinate.query_key(),
        pubkey: event.pubkey.clone(),
        title,
        description: event.tag("description").unwrap_or_default().to_string(),
        naddr: encode_coordinate(event, &coordinate)?,
        created_at: event.created_at,
        event: provenance(event)?,
        event_id: event.id.clone(),
    })
}

/// Profile metadata as published in a kind 0 event's content.
#[derive(Debug, Default, Deserialize)]
struct ProfileMetadata {
    name: Option<String>,
    #[serde(alias = "displayName")]
    display_name: Option<String>,
    picture: Option<String>,
    banner: Option<String>,
    about: Option<String>,
    nip05: Option<String>,
    lud16: Option<String>,
    lud06: Option<String>,
}

/// Kind 0.
pub fn profile(event: &Event) -> Result<UserProfile, NormalizationError> {
    let metadata: ProfileMetadata = if event.content.trim().is_empty() {
        ProfileMetadata::default()
    } else {
        serde_json::from_str(&event.content).map_err(|e| NormalizationError::InvalidField {
            id: event.id.clone(),
            field: "content",
            reason: e.to_string(),
        })?
    };

    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    Ok(UserProfile {
        id: event.pubkey.clone(),
        name: non_empty(metadata.name),
        display_name: non_empty(metadata.display_name),
        image: non_empty(metadata.picture),
        banner: non_empty(metadata.banner),
        about: non_empty(metadata.about),
        nip05: non_empty(metadata.nip05),
        lud16: non_empty(metadata.lud16).or_else(|| non_empty(metadata.lud06)),
        created_at: event.created_at,
        event: provenance(event)?,
    })
}

/// Kind 9735. `Ok(None)` when the invoice cannot be extracted.
pub fn zap(event: &Event) -> Result<Option<Zap>, NormalizationError> {
    let Some(details) = invoice::extract(event) else {
        trace!(id = %event.id, "dropping zap receipt without usable invoice");
        return Ok(None);
    };

    Ok(Some(Zap {
        id: event.id.clone(),
        zapper: event.pubkey.clone(),
        payer: details.payer,
        payee: details.payee,
        zapped_note: optional_tag(event, "e"),
        amount: details.amount,
        comment: details.comment,
        created_at: event.created_at,
        event: provenance(event)?,
        zapped_notes: all_tags(event, &["e"]),
    }))
}
