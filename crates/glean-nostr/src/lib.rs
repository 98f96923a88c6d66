//! Nostr plumbing for Glean.
//!
//! This crate holds everything Glean needs to talk about events without
//! knowing anything about the local cache:
//!
//! - **Events**: the signed event model and its kind discriminants
//! - **Tags**: lookups over an event's `[key, value, ...]` tag arrays
//! - **References**: NIP-19 `naddr`/`nevent`/`note`/`npub` codec and query keys
//! - **Filters**: NIP-01 subscription filters with a builder API
//! - **Network**: the `EventNetworkClient` trait, an in-process
//!   `MemoryNetwork`, and a WebSocket `RelayPool`

pub mod client;
mod error;
pub mod event;
pub mod filter;
pub mod memory;
pub mod message;
pub mod nip19;
pub mod relay;
pub mod tags;

pub use client::{EventNetworkClient, SubscribeOptions, Subscription, SubscriptionItem};
pub use error::NostrError;
pub use event::{Event, EventKind};
pub use filter::Filter;
pub use memory::MemoryNetwork;
pub use message::{ClientMessage, RelayMessage};
pub use nip19::{Coordinate, EventPointer, MalformedReference, Reference, decode_npub, encode_npub};
pub use relay::{DEFAULT_RELAYS, RelayPool, RelayPoolConfig};
pub use tags::{marked_value, positional_reply, value_of, values_of};
