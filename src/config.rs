use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::CatalogConfig;
use crate::domain::AppError;

/// Environment variable pointing at an optional JSON config file.
pub const CONFIG_ENV: &str = "TV_DOWNLOADS_CONFIG";

/// Upper bound for `chunk_size_kb` (64 MiB).
pub const MAX_CHUNK_SIZE_KB: usize = 64 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application-private data root; platform data dir when unset
    pub data_root: Option<PathBuf>,
    pub catalog: CatalogConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Write chunk size in KiB
    pub chunk_size_kb: usize,
    /// Interval between throughput samples in milliseconds
    pub sample_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, unset by default
    pub request_timeout_secs: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: 128,
            sample_interval_ms: 700,
            connect_timeout_secs: 15,
            request_timeout_secs: None,
        }
    }
}

impl TransferConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kb.saturating_mul(1024)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl AppConfig {
    /// Loads the file named by [`CONFIG_ENV`], or defaults when unset.
    pub fn load() -> Result<Self, AppError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.transfer.chunk_size_kb == 0 {
            return Err(AppError::Config(
                "chunk_size_kb must be greater than 0".to_string(),
            ));
        }
        if self.transfer.chunk_size_kb > MAX_CHUNK_SIZE_KB {
            return Err(AppError::Config(format!(
                "chunk_size_kb must be at most {}",
                MAX_CHUNK_SIZE_KB
            )));
        }
        if self.transfer.sample_interval_ms == 0 {
            return Err(AppError::Config(
                "sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_root(&self) -> Result<PathBuf, AppError> {
        if let Some(ref root) = self.data_root {
            return Ok(root.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("tv-downloads"))
            .ok_or_else(|| AppError::Config("no platform data directory".to_string()))
    }
}
