//! Reactive local cache of Nostr records for Glean.
//!
//! Inbound events are normalized into typed records, upserted into a
//! persistent store, and pushed to every live query whose answer may have
//! changed.
//!
//! ## Features
//!
//! - **Records**: typed records for articles, highlights, notes, bookmark
//!   lists, encrypted notes, profiles and zaps, each keeping its source event
//! - **Normalizer**: event to record transforms, boost unwrapping and the
//!   highlight blacklist
//! - **Store**: idempotent upserts over a memory or SQLite table store,
//!   with a change bus
//! - **Live queries**: store queries re-evaluated on relevant writes
//! - **Managers**: per-kind subscription managers that fetch, ingest and
//!   serve cached-first results

pub mod context;
mod error;
pub mod invoice;
pub mod live;
pub mod managers;
pub mod normalize;
pub mod record_store;
pub mod records;
pub mod store;

pub use context::{SyncConfig, SyncContext, SyncContextBuilder};
pub use error::{CacheError, NormalizationError, StoreFault};
pub use live::{LiveQuery, LiveQueryEngine, LiveQueryStream, QueryScope, Snapshot};
pub use managers::{
    ArticleManager, ArticleOptions, BookmarkListManager, BookmarkListOptions,
    EncryptedNoteManager, EncryptedNoteOptions, HighlightManager, HighlightOptions, IngestStats,
    Loaded, NoteManager, NoteOptions, ProfileManager, StreamHandle, ZapManager, ZapOptions,
};
pub use normalize::{HIGHLIGHT_BLACKLIST, Normalized, Normalizer};
pub use record_store::{Change, DEFAULT_CHANGE_CAPACITY, PutOutcome, RecordStore};
pub use records::{
    Article, BookmarkList, EncryptedNote, Highlight, Note, Record, Table, UserProfile, Zap,
};
pub use store::{MemoryTableStore, SqliteTableStore, StoredRow, TableStore};
