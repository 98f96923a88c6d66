//! Nostr event model.

use serde::{Deserialize, Serialize};

use crate::tags;

/// A signed Nostr event as received from a relay.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "bb22...",
///   "created_at": 1700000000,
///   "kind": 9802,
///   "tags": [["r", "https://example.com/post"], ["context", "..."]],
///   "content": "the quoted passage",
///   "sig": "cc33..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier (hex of the SHA-256 of the serialized event).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation, in seconds.
    pub created_at: i64,
    /// Kind discriminant.
    pub kind: u16,
    /// Tag arrays, verbatim.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Event content.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the id.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// The kind as a typed discriminant.
    pub fn event_kind(&self) -> EventKind {
        EventKind::from(self.kind)
    }

    /// First value of the first tag named `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        tags::value_of(&self.tags, key)
    }

    /// The `d` tag identifier of a parameterized replaceable event.
    ///
    /// Missing `d` tags are treated as the empty identifier.
    pub fn identifier(&self) -> &str {
        self.tag("d").unwrap_or("")
    }

    /// Serialize the event back to its JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an event from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The event kinds Glean understands.
///
/// Everything else is carried as `Other` so dispatch stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Kind 0: user metadata (profile).
    Metadata,
    /// Kind 1: short text note.
    TextNote,
    /// Kind 4: NIP-04 encrypted direct message.
    EncryptedDirectMessage,
    /// Kind 6: repost of a text note.
    Repost,
    /// Kind 16: generic repost of any kind.
    GenericRepost,
    /// Kind 9734: zap request (embedded in receipts).
    ZapRequest,
    /// Kind 9735: zap receipt.
    ZapReceipt,
    /// Kind 9802: highlight.
    Highlight,
    /// Kind 30001: categorized bookmark list (legacy).
    BookmarkList,
    /// Kind 30003: bookmark set.
    BookmarkSet,
    /// Kind 30023: long-form article.
    LongFormArticle,
    /// Anything else.
    Other(u16),
}

impl EventKind {
    /// The numeric discriminant.
    pub fn as_u16(self) -> u16 {
        match self {
            EventKind::Metadata => 0,
            EventKind::TextNote => 1,
            EventKind::EncryptedDirectMessage => 4,
            EventKind::Repost => 6,
            EventKind::GenericRepost => 16,
            EventKind::ZapRequest => 9734,
            EventKind::ZapReceipt => 9735,
            EventKind::Highlight => 9802,
            EventKind::BookmarkList => 30001,
            EventKind::BookmarkSet => 30003,
            EventKind::LongFormArticle => 30023,
            EventKind::Other(k) => k,
        }
    }

    /// Whether only the newest event per (kind, author) is current.
    pub fn is_replaceable(self) -> bool {
        let k = self.as_u16();
        k == 0 || k == 3 || (10_000..20_000).contains(&k)
    }

    /// Whether only the newest event per (kind, author, `d` tag) is current.
    pub fn is_parameterized_replaceable(self) -> bool {
        (30_000..40_000).contains(&self.as_u16())
    }
}

impl From<u16> for EventKind {
    fn from(kind: u16) -> Self {
        match kind {
            0 => EventKind::Metadata,
            1 => EventKind::TextNote,
            4 => EventKind::EncryptedDirectMessage,
            6 => EventKind::Repost,
            16 => EventKind::GenericRepost,
            9734 => EventKind::ZapRequest,
            9735 => EventKind::ZapReceipt,
            9802 => EventKind::Highlight,
            30001 => EventKind::BookmarkList,
            30003 => EventKind::BookmarkSet,
            30023 => EventKind::LongFormArticle,
            other => EventKind::Other(other),
        }
    }
}

impl From<EventKind> for u16 {
    fn from(kind: EventKind) -> Self {
        kind.as_u16()
    }
}
