//! The sync context shared by every subscription manager.
//!
//! Built once at startup and cloned into managers; there is no global
//! network handle.

use std::sync::Arc;

use dashmap::DashSet;
use glean_nostr::EventNetworkClient;
use serde::Deserialize;
use tracing::info;

use crate::live::LiveQueryEngine;
use crate::managers::{
    ArticleManager, BookmarkListManager, EncryptedNoteManager, HighlightManager, NoteManager,
    ProfileManager, ZapManager,
};
use crate::normalize::Normalizer;
use crate::record_store::{DEFAULT_CHANGE_CAPACITY, RecordStore};
use crate::store::{MemoryTableStore, TableStore};

/// Cache-layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Value of the `client` tag this application writes.
    pub client_name: String,
    /// Event ids to suppress on top of the built-in highlight blacklist.
    pub blacklist: Vec<String>,
    /// Capacity of the store's change bus.
    pub change_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_name: "glean".to_string(),
            blacklist: Vec::new(),
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

struct Shared {
    network: Arc<dyn EventNetworkClient>,
    store: RecordStore,
    live: LiveQueryEngine,
    normalizer: Normalizer,
    /// Profile keys with a point fetch in flight.
    profile_fetches: DashSet<String>,
}

/// Handles to the network, the store, the live query engine and the
/// normalizer.
#[derive(Clone)]
pub struct SyncContext {
    shared: Arc<Shared>,
}

impl SyncContext {
    /// Start building a context around a network client.
    pub fn builder(network: Arc<dyn EventNetworkClient>) -> SyncContextBuilder {
        SyncContextBuilder {
            network,
            config: SyncConfig::default(),
            table_store: None,
        }
    }

    pub fn network(&self) -> &dyn EventNetworkClient {
        self.shared.network.as_ref()
    }

    pub fn store(&self) -> &RecordStore {
        &self.shared.store
    }

    pub fn live(&self) -> &LiveQueryEngine {
        &self.shared.live
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.shared.normalizer
    }

    /// Claim the point fetch for `pubkey`. Returns `false` if one is
    /// already running.
    pub(crate) fn begin_profile_fetch(&self, pubkey: &str) -> bool {
        self.shared.profile_fetches.insert(pubkey.to_string())
    }

    pub(crate) fn end_profile_fetch(&self, pubkey: &str) {
        self.shared.profile_fetches.remove(pubkey);
    }

    pub fn articles(&self) -> ArticleManager {
        ArticleManager::new(self.clone())
    }

    pub fn highlights(&self) -> HighlightManager {
        HighlightManager::new(self.clone())
    }

    pub fn notes(&self) -> NoteManager {
        NoteManager::new(self.clone())
    }

    pub fn bookmark_lists(&self) -> BookmarkListManager {
        BookmarkListManager::new(self.clone())
    }

    pub fn encrypted_notes(&self) -> EncryptedNoteManager {
        EncryptedNoteManager::new(self.clone())
    }

    pub fn profiles(&self) -> ProfileManager {
        ProfileManager::new(self.clone())
    }

    pub fn zaps(&self) -> ZapManager {
        ZapManager::new(self.clone())
    }
}

/// Builder for [`SyncContext`].
pub struct SyncContextBuilder {
    network: Arc<dyn EventNetworkClient>,
    config: SyncConfig,
    table_store: Option<Arc<dyn TableStore>>,
}

impl SyncContextBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this storage engine. Defaults to [`MemoryTableStore`].
    pub fn table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.table_store = Some(store);
        self
    }

    pub fn build(self) -> SyncContext {
        let backend = self
            .table_store
            .unwrap_or_else(|| Arc::new(MemoryTableStore::new()));
        let store = RecordStore::new(backend, self.config.change_capacity);
        let normalizer =
            Normalizer::new(self.config.client_name.clone()).with_blacklisted(self.config.blacklist);

        info!(client = %self.config.client_name, "sync context ready");

        SyncContext {
            shared: Arc::new(Shared {
                network: self.network,
                live: LiveQueryEngine::new(store.clone()),
                store,
                normalizer,
                profile_fetches: DashSet::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glean_nostr::MemoryNetwork;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.client_name, "glean");
        assert!(config.blacklist.is_empty());
        assert_eq!(config.change_capacity, DEFAULT_CHANGE_CAPACITY);
    }

    #[test]
    fn test_builder_applies_blacklist() {
        let ctx = SyncContext::builder(Arc::new(MemoryNetwork::new()))
            .config(SyncConfig {
                client_name: "reader".to_string(),
                blacklist: vec!["bad".to_string()],
                ..SyncConfig::default()
            })
            .build();
        assert!(ctx.normalizer().is_blacklisted("bad"));
        assert_eq!(ctx.normalizer().client_name(), "reader");
    }

    #[test]
    fn test_profile_fetch_claim() {
        let ctx = SyncContext::builder(Arc::new(MemoryNetwork::new())).build();
        assert!(ctx.begin_profile_fetch("pk"));
        assert!(!ctx.begin_profile_fetch("pk"));
        ctx.end_profile_fetch("pk");
        assert!(ctx.begin_profile_fetch("pk"));
    }
}
