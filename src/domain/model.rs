use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::AppError;
use crate::utils::get_timestamp;

/// Coarse lifecycle of a download as tracked by the registry.
///
/// There is no failed state: a failed or cancelled job goes back to `None`
/// so it can be started again from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DownloadState {
    #[default]
    None,
    Queued,
    Downloading,
    Completed,
}

impl DownloadState {
    /// `Queued` or `Downloading`.
    pub fn is_active(self) -> bool {
        matches!(self, DownloadState::Queued | DownloadState::Downloading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Series => "series",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(ContentType::Movie),
            "series" => Ok(ContentType::Series),
            other => Err(AppError::InvalidKey(format!("unknown content type '{}'", other))),
        }
    }
}

/// Stable identifier of a downloadable unit, rendered as `"{type}_{id}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadKey {
    pub content_type: ContentType,
    pub stream_id: u64,
}

impl DownloadKey {
    pub fn new(content_type: ContentType, stream_id: u64) -> Self {
        Self {
            content_type,
            stream_id,
        }
    }

    /// File name of the finished artifact, e.g. `482.mp4`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.stream_id, extension.trim_start_matches('.'))
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.content_type, self.stream_id)
    }
}

impl FromStr for DownloadKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^(movie|series)_(\d+)$")
            .map_err(|e| AppError::InvalidKey(e.to_string()))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| AppError::InvalidKey(s.to_string()))?;

        let content_type = caps[1].parse()?;
        let stream_id = caps[2]
            .parse()
            .map_err(|_| AppError::InvalidKey(s.to_string()))?;

        Ok(Self::new(content_type, stream_id))
    }
}

/// Entry of the process-wide downloads log shown by the downloads list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadItem {
    pub key: String,
    pub title: String,
    pub url: String,
    pub local_path: PathBuf,
    pub status: String,
    pub speed_mbps: f64,
    pub queued_at: u64,
}

impl DownloadItem {
    pub fn new(key: String, title: String, url: String, local_path: PathBuf) -> Self {
        Self {
            key,
            title,
            url,
            local_path,
            status: "Queued".to_string(),
            speed_mbps: 0.0,
            queued_at: get_timestamp(),
        }
    }

    /// Returns false when the change is below the display threshold.
    pub fn set_speed(&mut self, mbps: f64) -> bool {
        if (self.speed_mbps - mbps).abs() > 0.01 {
            self.speed_mbps = mbps;
            true
        } else {
            false
        }
    }
}
