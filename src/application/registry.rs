use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::DownloadState;

/// Process-wide map of download key to lifecycle state.
///
/// Memory only. Absence reads as [`DownloadState::None`]; callers are
/// expected to cross-check against the filesystem before trusting it.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    states: Mutex<HashMap<String, DownloadState>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, DownloadState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_state(&self, key: impl AsRef<str>, state: DownloadState) {
        let key = key.as_ref();
        if state == DownloadState::None {
            self.states().remove(key);
        } else {
            self.states().insert(key.to_string(), state);
        }
    }

    pub fn get_state(&self, key: impl AsRef<str>) -> DownloadState {
        self.states()
            .get(key.as_ref())
            .copied()
            .unwrap_or_default()
    }

    pub fn clear(&self, key: impl AsRef<str>) {
        self.states().remove(key.as_ref());
    }

    /// Marks `key` as `Queued` unless it is already queued or downloading.
    /// Check and update happen under one lock.
    pub fn try_begin(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        let mut states = self.states();
        if states.get(key).is_some_and(|state| state.is_active()) {
            return false;
        }
        states.insert(key.to_string(), DownloadState::Queued);
        true
    }

    pub fn is_active(&self, key: impl AsRef<str>) -> bool {
        self.get_state(key).is_active()
    }

    pub fn snapshot(&self) -> HashMap<String, DownloadState> {
        self.states().clone()
    }
}
