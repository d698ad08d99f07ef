//! The handle owned by the host application: local store, scan feed and,
//! when a sync section is configured, the reconciler.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::StoreError;
use crate::http_remote::HttpRemote;
use crate::scan_feed::{ScanFeed, DEFAULT_DEBOUNCE};
use crate::scan_model::SessionFlags;
use crate::session_store::SessionStore;
use crate::sync::{RemoteSessions, SyncReconciler};

pub type SharedRemote = Arc<dyn RemoteSessions + Send + Sync>;

/// Body of the `start_session` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(flatten)]
    pub flags: SessionFlags,
}

pub struct ScanClient {
    store: Arc<SessionStore>,
    feed: ScanFeed,
    reconciler: Option<SyncReconciler<SharedRemote>>,
}

impl ScanClient {
    /// Opens the store and, if `config.sync` is set, an HTTP-backed reconciler.
    pub fn open(config: ClientConfig) -> Result<Self, StoreError> {
        let remote = config
            .sync
            .as_ref()
            .map(|sync| Arc::new(HttpRemote::new(sync)) as SharedRemote);
        Self::with_remote(config, remote)
    }

    /// Like [`open`](Self::open) with an explicit remote side.
    pub fn with_remote(
        config: ClientConfig,
        remote: Option<SharedRemote>,
    ) -> Result<Self, StoreError> {
        let window = config.debounce_ms.map(Duration::from_millis).unwrap_or(DEFAULT_DEBOUNCE);
        let store = Arc::new(SessionStore::open(config.store)?);
        let reconciler = remote.map(|remote| SyncReconciler::new(Arc::clone(&store), remote));

        info!(
            "Scan client ready at {} ({})",
            store.config().path.display(),
            if reconciler.is_some() { "sync enabled" } else { "offline only" }
        );
        Ok(Self {
            store,
            feed: ScanFeed::new(window),
            reconciler,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn feed(&self) -> &ScanFeed {
        &self.feed
    }

    pub fn reconciler(&self) -> Option<&SyncReconciler<SharedRemote>> {
        self.reconciler.as_ref()
    }
}
