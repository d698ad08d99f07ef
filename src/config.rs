//! Configuration for the local store, the sync transport and the remote service.
//!
//! Every struct deserializes from JSON with defaults for missing fields, so the
//! FFI caller can pass `{}` and get a working offline store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Local LMDB store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Directory of the LMDB environment. Created when missing.
    pub path: PathBuf,
    pub map_size_mb: usize,
    /// Sessions older than this are dropped from the active slot and history.
    pub expiry_hours: i64,
    pub max_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scan_sessions.lmdb"),
            map_size_mb: 10,
            expiry_hours: 24,
            max_history: 50,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Session lifetime. `expiryHours` must be positive and fit a `chrono::Duration`.
    pub fn expiry(&self) -> Result<chrono::Duration, StoreError> {
        if self.expiry_hours <= 0 {
            return Err(StoreError::InvalidConfig(format!(
                "expiryHours must be positive, got {}",
                self.expiry_hours
            )));
        }
        chrono::Duration::try_hours(self.expiry_hours).ok_or_else(|| {
            StoreError::InvalidConfig(format!("expiryHours out of range: {}", self.expiry_hours))
        })
    }
}

/// HTTP transport settings used by [`HttpRemote`](crate::http_remote::HttpRemote).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Base URL of the session API, e.g. `http://localhost:3001/api`.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Remote session service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// How many fresh short codes to try before giving up on a collision streak.
    pub short_code_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { short_code_attempts: 8 }
    }
}

/// Configuration accepted by the FFI `create_store` entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub store: StoreConfig,
    /// Without a sync section the client works offline only.
    pub sync: Option<SyncConfig>,
    /// Window in milliseconds during which a repeated detection of the same
    /// code is ignored.
    #[serde(rename = "debounceMs")]
    pub debounce_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store, StoreConfig::default());
        assert!(config.sync.is_none());
        assert_eq!(config.store.expiry_hours, 24);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let json = r#"{"store":{"path":"/x","maxHistory":3},"sync":{"baseUrl":"http://h"}}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/x"));
        assert_eq!(config.store.max_history, 3);
        assert_eq!(config.store.map_size_mb, 10);
        let sync = config.sync.unwrap();
        assert_eq!(sync.base_url, "http://h");
        assert_eq!(sync.timeout_secs, 15);
    }

    #[test]
    fn expiry_rejects_non_positive_and_out_of_range_hours() {
        assert_eq!(StoreConfig::default().expiry().unwrap(), chrono::Duration::hours(24));

        for hours in [0, -5, i64::MAX] {
            let config = StoreConfig {
                expiry_hours: hours,
                ..StoreConfig::default()
            };
            assert!(
                matches!(config.expiry(), Err(StoreError::InvalidConfig(_))),
                "{hours} should be rejected"
            );
        }
    }
}
