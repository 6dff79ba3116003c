//! Download services created once at startup and shared by every page.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::api::ApiClient;
use crate::application::{
    resolve_key_state, resolve_state, DownloadQueue, DownloadRegistry, HttpTransfer, Listener,
    Transfer,
};
use crate::config::AppConfig;
use crate::domain::{AppError, ContentType, DownloadItem, DownloadKey, DownloadState};
use crate::storage::{part_path, DownloadStorage};

/// Result of asking for a download from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Queued,
    AlreadyActive,
    AlreadyCompleted,
}

#[derive(Clone)]
pub struct AppServices {
    api: ApiClient,
    storage: DownloadStorage,
    queue: DownloadQueue,
}

impl AppServices {
    pub fn from_config(config: AppConfig) -> Result<Self, AppError> {
        let api = ApiClient::with_transfer_config(config.catalog.clone(), &config.transfer)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let transfer = HttpTransfer::new(api.clone(), &config.transfer);
        Self::with_transfer(&config, api, Arc::new(transfer))
    }

    pub fn with_transfer(
        config: &AppConfig,
        api: ApiClient,
        transfer: Arc<dyn Transfer>,
    ) -> Result<Self, AppError> {
        let storage = DownloadStorage::new(config.data_root()?);
        let queue = DownloadQueue::new(transfer, Arc::new(DownloadRegistry::new()));
        Ok(Self {
            api,
            storage,
            queue,
        })
    }

    pub fn storage(&self) -> &DownloadStorage {
        &self.storage
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Displayed state of a catalog entry.
    pub fn resolve(&self, key: &DownloadKey, extension: &str) -> DownloadState {
        resolve_key_state(&self.storage, self.queue.registry(), key, extension)
    }

    /// Displayed state of an entry of the downloads log.
    pub fn resolve_item(&self, item: &DownloadItem) -> DownloadState {
        resolve_state(
            self.queue.registry(),
            &item.key,
            &item.local_path,
            &part_path(&item.local_path),
        )
    }

    /// Reconciles with the disk, then queues the stream if nothing is there.
    pub fn start(
        &self,
        title: &str,
        key: &DownloadKey,
        extension: &str,
        listener: Listener,
    ) -> Result<StartOutcome, AppError> {
        match self.resolve(key, extension) {
            DownloadState::Completed => return Ok(StartOutcome::AlreadyCompleted),
            DownloadState::Queued | DownloadState::Downloading => {
                return Ok(StartOutcome::AlreadyActive)
            }
            DownloadState::None => {}
        }

        self.storage.downloads_folder(key.content_type)?;
        let paths = self.storage.paths_for(key, extension);
        let url = self
            .api
            .stream_url(key.content_type, key.stream_id, extension);

        if self
            .queue
            .start_download(title, url, paths.final_path, key.to_string(), listener)
        {
            Ok(StartOutcome::Queued)
        } else {
            Ok(StartOutcome::AlreadyActive)
        }
    }

    /// Removes leftover `.part` files of a content type.
    ///
    /// Skipped while a download of that type is queued or running, since its
    /// temp file would be removed from under it.
    pub fn cleanup_part_files(&self, content_type: ContentType) -> Result<usize, AppError> {
        let busy = self
            .queue
            .registry()
            .snapshot()
            .iter()
            .filter(|(_, state)| state.is_active())
            .filter_map(|(key, _)| key.parse::<DownloadKey>().ok())
            .any(|key| key.content_type == content_type);
        if busy {
            warn!("Not cleaning {} temp files while downloads are active", content_type);
            return Ok(0);
        }

        let removed = self.storage.cleanup_part_files(content_type)?;
        info!("Removed {} orphaned {} temp files", removed, content_type);
        Ok(removed)
    }

    pub fn downloads_root(&self) -> &Path {
        self.storage.downloads_root()
    }
}
