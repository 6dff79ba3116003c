use std::path::Path;

use super::registry::DownloadRegistry;
use crate::domain::{DownloadKey, DownloadState};
use crate::storage::DownloadStorage;

/// State to display for `key`, with disk evidence taking precedence.
///
/// A finished file always wins. A `.part` file counts as an ongoing download
/// unless the registry has no record of the key, which means it was left
/// behind by an earlier process and must not block a retry. A recorded
/// `Completed` whose file has since been deleted reads as `None`.
pub fn resolve_state(
    registry: &DownloadRegistry,
    key: impl AsRef<str>,
    final_path: &Path,
    temp_path: &Path,
) -> DownloadState {
    if final_path.exists() {
        return DownloadState::Completed;
    }

    let recorded = match registry.get_state(key) {
        DownloadState::Completed => DownloadState::None,
        state => state,
    };
    if temp_path.exists() {
        return match recorded {
            DownloadState::None => DownloadState::None,
            _ => DownloadState::Downloading,
        };
    }

    recorded
}

/// [`resolve_state`] with both paths derived from the storage layout.
pub fn resolve_key_state(
    storage: &DownloadStorage,
    registry: &DownloadRegistry,
    key: &DownloadKey,
    extension: &str,
) -> DownloadState {
    let paths = storage.paths_for(key, extension);
    resolve_state(registry, key.to_string(), &paths.final_path, &paths.temp_path)
}
