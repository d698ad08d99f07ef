//! Front door for decoded barcodes coming from a camera or a manual entry field.
//!
//! Camera decoders report the same code many times per second while it stays
//! in frame. [`ScanFeed`] ignores a repeat of the last accepted code inside the
//! debounce window; manual submissions always count.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::session_store::SessionStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// What the UI shows after an accepted scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFeedback {
    pub code: String,
    /// `false` for a duplicate, which only bumped the quantity.
    pub is_new: bool,
    /// Open the details form for this code.
    pub needs_details: bool,
}

pub struct ScanFeed {
    window: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl Default for ScanFeed {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl ScanFeed {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Handles a camera detection. `None` when the text was blank, debounced,
    /// or there is no active session.
    pub fn on_decoded(
        &self,
        store: &SessionStore,
        text: &str,
    ) -> Result<Option<ScanFeedback>, StoreError> {
        self.on_decoded_at(store, text, Instant::now())
    }

    pub fn on_decoded_at(
        &self,
        store: &SessionStore,
        text: &str,
        at: Instant,
    ) -> Result<Option<ScanFeedback>, StoreError> {
        let code = text.trim();
        if code.is_empty() {
            return Ok(None);
        }

        {
            let mut last = self.last.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
            if let Some((previous, seen)) = last.as_ref() {
                if previous == code && at.saturating_duration_since(*seen) < self.window {
                    debug!("Debounced repeat of {code}");
                    return Ok(None);
                }
            }
            *last = Some((code.to_string(), at));
        }

        record(store, code)
    }

    /// Handles a code typed by hand. Never debounced.
    pub fn submit_manual(
        &self,
        store: &SessionStore,
        text: &str,
    ) -> Result<Option<ScanFeedback>, StoreError> {
        let code = text.trim();
        if code.is_empty() {
            return Ok(None);
        }
        record(store, code)
    }
}

fn record(store: &SessionStore, code: &str) -> Result<Option<ScanFeedback>, StoreError> {
    Ok(store.scan(code)?.map(|receipt| ScanFeedback {
        code: code.to_string(),
        is_new: receipt.is_new,
        needs_details: receipt.needs_details,
    }))
}
