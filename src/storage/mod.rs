//! On-disk layout of downloaded media.
//!
//! ```text
//! {data_root}/downloads/{content_type}/{stream_id}.{ext}
//! {data_root}/downloads/{content_type}/{stream_id}.{ext}.part
//! ```

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::{ContentType, DownloadKey};
use crate::utils::format_size;

const PART_SUFFIX: &str = ".part";
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "avi", "ts"];

/// Final artifact and its sibling temp file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPaths {
    pub final_path: PathBuf,
    pub temp_path: PathBuf,
}

/// A finished video found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVideo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl LocalVideo {
    pub fn display_size(&self) -> String {
        format_size(self.size)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadStorage {
    root: PathBuf,
}

impl DownloadStorage {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into().join("downloads"),
        }
    }

    pub fn downloads_root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, content_type: ContentType) -> PathBuf {
        self.root.join(content_type.as_str())
    }

    /// Folder for one content type, created on demand.
    pub fn downloads_folder(&self, content_type: ContentType) -> io::Result<PathBuf> {
        let folder = self.folder_path(content_type);
        std::fs::create_dir_all(&folder)?;
        Ok(folder)
    }

    pub fn local_path(&self, content_type: ContentType, file_name: &str) -> io::Result<PathBuf> {
        Ok(self.downloads_folder(content_type)?.join(file_name))
    }

    /// Paths for a key without touching the filesystem.
    pub fn paths_for(&self, key: &DownloadKey, extension: &str) -> DownloadPaths {
        let final_path = self
            .folder_path(key.content_type)
            .join(key.file_name(extension));
        let temp_path = part_path(&final_path);
        DownloadPaths {
            final_path,
            temp_path,
        }
    }

    /// Deletes leftover `.part` files of one content type.
    ///
    /// Failures on individual files are logged and skipped. Returns the
    /// number of files removed.
    pub fn cleanup_part_files(&self, content_type: ContentType) -> io::Result<usize> {
        let folder = self.folder_path(content_type);
        if !folder.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&folder)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", folder.display(), e);
                    continue;
                }
            };
            if !path.is_file() || !is_part_file(&path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed orphaned {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Finished videos under the downloads root, newest first.
    pub fn scan_local_videos(&self) -> Vec<LocalVideo> {
        let mut videos: Vec<LocalVideo> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| is_video_file(entry.path()))
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                Some(LocalVideo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path().to_path_buf(),
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                })
            })
            .collect();

        videos.sort_by(|a, b| b.modified.cmp(&a.modified));
        videos
    }
}

/// `name.ext` -> `name.ext.part`
pub fn part_path(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn is_part_file(path: &Path) -> bool {
    path.to_string_lossy().ends_with(PART_SUFFIX)
}

fn is_video_file(path: &Path) -> bool {
    if is_part_file(path) {
        return false;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}
