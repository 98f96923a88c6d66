//! Typed domain records.
//!
//! Every record is derived from exactly one event and keeps that event's
//! serialized JSON in its `event` field. Identifiers are stable: the event
//! id, or for replaceable kinds the coordinate query key
//! `kind:pubkey:identifier`, so reprocessing an event (or a newer version of
//! a replaceable one) overwrites rather than duplicates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Names of the secondary lookup keys.
pub mod index {
    /// Source or canonical URL.
    pub const URL: &str = "url";
    /// Author; for highlights also the booster.
    pub const PUBKEY: &str = "pubkey";
    /// Article a highlight points at (coordinate query key or event id).
    pub const ARTICLE: &str = "article";
    /// Reply target.
    pub const REPLY_TO: &str = "reply_to";
    /// Quote target.
    pub const QUOTE_OF: &str = "quote_of";
    /// Recipient of an encrypted note.
    pub const RECIPIENT: &str = "recipient";
    /// Payee of a zap.
    pub const PAYEE: &str = "payee";
    /// Note a zap pays for.
    pub const ZAPPED_NOTE: &str = "zapped_note";
    /// Event id behind a replaceable record.
    pub const EVENT_ID: &str = "event_id";
}

/// One logical table per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Articles,
    Highlights,
    Notes,
    BookmarkLists,
    EncryptedNotes,
    UserProfiles,
    Zaps,
}

impl Table {
    /// Every table.
    pub const ALL: [Table; 7] = [
        Table::Articles,
        Table::Highlights,
        Table::Notes,
        Table::BookmarkLists,
        Table::EncryptedNotes,
        Table::UserProfiles,
        Table::Zaps,
    ];

    /// The table name used by storage backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Articles => "articles",
            Table::Highlights => "highlights",
            Table::Notes => "notes",
            Table::BookmarkLists => "bookmark_lists",
            Table::EncryptedNotes => "encrypted_notes",
            Table::UserProfiles => "user_profiles",
            Table::Zaps => "zaps",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that can live in the record store.
pub trait Record: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// The table holding records of this type.
    const TABLE: Table;

    /// The stable identifier.
    fn id(&self) -> &str;

    /// Secondary lookup entries as `(index, key)` pairs.
    fn index_entries(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// For replaceable records, the creation time of the producing event.
    ///
    /// The store keeps the newest version and skips strictly older writes.
    fn replaced_at(&self) -> Option<i64> {
        None
    }
}

fn push_optional(entries: &mut Vec<(&'static str, String)>, index: &'static str, key: &Option<String>) {
    if let Some(key) = key {
        entries.push((index, key.clone()));
    }
}

fn push_all(entries: &mut Vec<(&'static str, String)>, index: &'static str, keys: &[String]) {
    entries.extend(keys.iter().map(|key| (index, key.clone())));
}

/// A long-form article (kind 30023).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Query key of the article's coordinate.
    pub id: String,
    /// The `url` (or `r`) tag, else the `naddr` reference.
    pub url: String,
    pub title: String,
    /// Publishing author.
    pub pubkey: String,
    /// Every `t` tag value.
    pub tags: Vec<String>,
    pub content: String,
    /// Display name override from the `author` tag.
    pub author: Option<String>,
    /// First publication time from the `published_at` tag.
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: i64,
    /// The producing event, serialized.
    pub event: String,
    /// Id of the producing event.
    pub event_id: String,
    /// Every `url` and `r` tag value, for lookups by any of them.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Record for Article {
    const TABLE: Table = Table::Articles;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![
            (index::URL, self.url.clone()),
            (index::PUBKEY, self.pubkey.clone()),
            (index::EVENT_ID, self.event_id.clone()),
        ];
        push_all(&mut entries, index::URL, &self.urls);
        entries
    }

    fn replaced_at(&self) -> Option<i64> {
        Some(self.created_at)
    }
}

/// A highlighted passage (kind 9802), possibly boosted by a third party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    /// The highlight's event id, or the boost's when boosted.
    pub id: String,
    /// Source page from the `r` tag.
    pub url: Option<String>,
    /// The highlighter.
    pub pubkey: String,
    /// Quoted text.
    pub content: String,
    /// Surrounding text from the `context` tag.
    pub context: Option<String>,
    /// Highlighted article: the `a` tag, else the `e` tag.
    pub article_id: Option<String>,
    /// Who re-shared the highlight.
    pub boosted_by: Option<String>,
    pub timestamp: i64,
    /// The highlight event, serialized.
    pub event: String,
    /// Every `a` and `e` tag value.
    #[serde(default)]
    pub articles: Vec<String>,
    /// Every `r` tag value.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Highlight {
    /// Whether the highlight points at `key` through any `a` or `e` tag.
    pub fn is_about(&self, key: &str) -> bool {
        self.article_id.as_deref() == Some(key) || self.articles.iter().any(|a| a == key)
    }

    /// Whether the highlight was taken from `url` according to any `r` tag.
    pub fn is_from(&self, url: &str) -> bool {
        self.url.as_deref() == Some(url) || self.urls.iter().any(|u| u == url)
    }
}

impl Record for Highlight {
    const TABLE: Table = Table::Highlights;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![(index::PUBKEY, self.pubkey.clone())];
        push_optional(&mut entries, index::PUBKEY, &self.boosted_by);
        push_optional(&mut entries, index::ARTICLE, &self.article_id);
        push_all(&mut entries, index::ARTICLE, &self.articles);
        push_optional(&mut entries, index::URL, &self.url);
        push_all(&mut entries, index::URL, &self.urls);
        entries
    }
}

/// A short text note (kind 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub pubkey: String,
    pub content: String,
    /// Event id or coordinate query key this note replies to.
    pub reply_to: Option<String>,
    /// Event id this note quotes.
    pub quote_of: Option<String>,
    pub created_at: i64,
    pub event: String,
    /// Every `e` and `a` tag value: the whole thread the note takes part in.
    #[serde(default)]
    pub thread: Vec<String>,
    /// Every `q` tag value.
    #[serde(default)]
    pub quotes: Vec<String>,
}

impl Note {
    /// Whether any `e` or `a` tag points at `key`.
    pub fn is_reply_to(&self, key: &str) -> bool {
        self.reply_to.as_deref() == Some(key) || self.thread.iter().any(|t| t == key)
    }

    /// Whether any `q` tag points at `key`.
    pub fn is_quote_of(&self, key: &str) -> bool {
        self.quote_of.as_deref() == Some(key) || self.quotes.iter().any(|q| q == key)
    }
}

impl Record for Note {
    const TABLE: Table = Table::Notes;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![(index::PUBKEY, self.pubkey.clone())];
        push_optional(&mut entries, index::REPLY_TO, &self.reply_to);
        push_all(&mut entries, index::REPLY_TO, &self.thread);
        push_optional(&mut entries, index::QUOTE_OF, &self.quote_of);
        push_all(&mut entries, index::QUOTE_OF, &self.quotes);
        entries
    }
}

/// A named bookmark list (kinds 30001 and 30003).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkList {
    /// Query key of the list's coordinate.
    pub id: String,
    pub pubkey: String,
    pub title: String,
    pub description: String,
    /// Shareable `naddr1...` reference.
    pub naddr: String,
    pub created_at: i64,
    pub event: String,
    pub event_id: String,
}

impl Record for BookmarkList {
    const TABLE: Table = Table::BookmarkLists;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (index::PUBKEY, self.pubkey.clone()),
            (index::EVENT_ID, self.event_id.clone()),
        ]
    }

    fn replaced_at(&self) -> Option<i64> {
        Some(self.created_at)
    }
}

/// An encrypted direct message (kind 4). The payload is never decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedNote {
    pub id: String,
    /// Sender.
    pub pubkey: String,
    pub recipient: String,
    /// Ciphertext.
    pub content: String,
    pub reply_to: Option<String>,
    /// Whether the `client` tag names this application.
    pub own_client: bool,
    pub created_at: i64,
    pub event: String,
    /// Every `e` tag value.
    #[serde(default)]
    pub thread: Vec<String>,
}

impl EncryptedNote {
    pub fn is_reply_to(&self, id: &str) -> bool {
        self.reply_to.as_deref() == Some(id) || self.thread.iter().any(|t| t == id)
    }
}

impl Record for EncryptedNote {
    const TABLE: Table = Table::EncryptedNotes;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![
            (index::PUBKEY, self.pubkey.clone()),
            (index::RECIPIENT, self.recipient.clone()),
        ];
        push_optional(&mut entries, index::REPLY_TO, &self.reply_to);
        push_all(&mut entries, index::REPLY_TO, &self.thread);
        entries
    }
}

/// Profile metadata (kind 0), keyed by the subject's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The subject's public key.
    pub id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    /// Avatar URL.
    pub image: Option<String>,
    pub banner: Option<String>,
    pub about: Option<String>,
    /// NIP-05 verified identifier.
    pub nip05: Option<String>,
    /// Lightning address (`lud16`, else `lud06`).
    pub lud16: Option<String>,
    pub created_at: i64,
    /// The profile event, serialized; empty until one has been seen.
    pub event: String,
}

impl UserProfile {
    /// A profile for `pubkey` with no metadata yet.
    pub fn placeholder(pubkey: impl Into<String>) -> Self {
        Self {
            id: pubkey.into(),
            name: None,
            display_name: None,
            image: None,
            banner: None,
            about: None,
            nip05: None,
            lud16: None,
            created_at: 0,
            event: String::new(),
        }
    }

    /// Whether a profile event has been seen.
    pub fn has_metadata(&self) -> bool {
        !self.event.is_empty()
    }
}

impl Record for UserProfile {
    const TABLE: Table = Table::UserProfiles;

    fn id(&self) -> &str {
        &self.id
    }

    fn replaced_at(&self) -> Option<i64> {
        Some(self.created_at)
    }
}

/// A zap receipt (kind 9735).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zap {
    pub id: String,
    /// The paying service that published the receipt.
    pub zapper: String,
    pub payer: String,
    pub payee: String,
    pub zapped_note: Option<String>,
    /// Amount in sats.
    pub amount: u64,
    pub comment: Option<String>,
    pub created_at: i64,
    pub event: String,
    /// Every `e` tag value on the receipt.
    #[serde(default)]
    pub zapped_notes: Vec<String>,
}

impl Zap {
    pub fn pays_for(&self, id: &str) -> bool {
        self.zapped_note.as_deref() == Some(id) || self.zapped_notes.iter().any(|n| n == id)
    }
}

impl Record for Zap {
    const TABLE: Table = Table::Zaps;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![(index::PAYEE, self.payee.clone())];
        push_optional(&mut entries, index::ZAPPED_NOTE, &self.zapped_note);
        push_all(&mut entries, index::ZAPPED_NOTE, &self.zapped_notes);
        entries
    }
}
