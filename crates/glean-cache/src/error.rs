//! Error types for the cache layer.

use glean_nostr::{MalformedReference, NostrError};
use thiserror::Error;

use crate::Table;

/// A failure of the persistent table store.
///
/// Faults are fatal to the operation that hit them and are never retried
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreFault {
    /// The storage engine failed.
    #[error("storage I/O failed: {0}")]
    Io(String),

    /// A stored body no longer deserializes into its record type.
    #[error("corrupt record {table}/{id}: {reason}")]
    Corrupt {
        table: Table,
        id: String,
        reason: String,
    },

    /// A record could not be serialized for storage.
    #[error("could not serialize {table}/{id}: {reason}")]
    Serialize {
        table: Table,
        id: String,
        reason: String,
    },
}

impl From<rusqlite::Error> for StoreFault {
    fn from(e: rusqlite::Error) -> Self {
        StoreFault::Io(e.to_string())
    }
}

/// A single inbound event could not be turned into a record.
///
/// Caught at the ingest boundary: the event is dropped and the stream
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    /// No record kind is derived from this event kind.
    #[error("event {id}: unsupported kind {kind}")]
    UnsupportedKind { id: String, kind: u16 },

    /// A structurally required tag is absent.
    #[error("event {id}: missing required tag {tag:?}")]
    MissingTag { id: String, tag: &'static str },

    /// A field is present but unusable.
    #[error("event {id}: invalid {field}: {reason}")]
    InvalidField {
        id: String,
        field: &'static str,
        reason: String,
    },

    /// The event embedded in a boost was rejected.
    #[error("boost {id}: embedded event rejected: {source}")]
    Boost {
        id: String,
        #[source]
        source: Box<NormalizationError>,
    },
}

/// Errors surfaced to callers of the subscription managers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A shareable reference in the options did not decode. Raised before
    /// any store or network access.
    #[error(transparent)]
    MalformedReference(#[from] MalformedReference),

    /// The table store failed.
    #[error("store fault: {0}")]
    Store(#[from] StoreFault),

    /// The network failed where an answer was required.
    #[error("network error: {0}")]
    Network(#[from] NostrError),
}
