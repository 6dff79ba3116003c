//! Copy one remote URL to a local file, reporting throughput as it goes.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiError};
use crate::config::TransferConfig;
use crate::utils::throughput_mbps;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

/// Receives throughput samples in MB/s.
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Streams `url` into `dest` and returns the number of bytes written.
///
/// `dest` is expected to be a temporary path. On error the partially written
/// file is left in place for the caller to remove.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>;
}

/// Accumulates bytes and turns them into periodic MB/s samples.
#[derive(Debug)]
pub struct ThroughputSampler {
    interval: Duration,
    window_start: Instant,
    bytes: u64,
}

impl ThroughputSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            bytes: 0,
        }
    }

    /// Adds `bytes`; returns a sample once the interval has elapsed.
    pub fn record(&mut self, bytes: u64) -> Option<f64> {
        self.bytes += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let mbps = throughput_mbps(self.bytes, elapsed);
        self.bytes = 0;
        self.window_start = Instant::now();
        Some(mbps)
    }

    /// Sample for whatever was recorded since the last one.
    pub fn finish(self) -> Option<f64> {
        let elapsed = self.window_start.elapsed();
        if self.bytes > 0 && !elapsed.is_zero() {
            Some(throughput_mbps(self.bytes, elapsed))
        } else {
            None
        }
    }
}

/// Production transfer over HTTP.
#[derive(Clone)]
pub struct HttpTransfer {
    client: ApiClient,
    chunk_size: usize,
    sample_interval: Duration,
}

impl HttpTransfer {
    pub fn new(client: ApiClient, config: &TransferConfig) -> Self {
        Self {
            client,
            chunk_size: config.chunk_size().max(1),
            sample_interval: config.sample_interval(),
        }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (total, stream) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            opened = self.client.download_file_stream(url) => opened?,
        };
        let mut stream = stream.boxed();

        info!(
            "Transferring {} -> {} ({} bytes)",
            url,
            dest.display(),
            total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
        );

        let mut file = tokio::fs::File::create(dest).await?;
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut sampler = ThroughputSampler::new(self.sample_interval);
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    debug!("Transfer of {} cancelled after {} bytes", url, written);
                    return Err(TransferError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            buffer.extend_from_slice(&chunk?);

            if buffer.len() >= self.chunk_size {
                file.write_all(&buffer).await?;
                written += buffer.len() as u64;
                let moved = buffer.len() as u64;
                buffer.clear();

                if let Some(mbps) = sampler.record(moved) {
                    debug!("{}: {:.2} MB/s", url, mbps);
                    progress(mbps);
                }
            }
        }

        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            if let Some(mbps) = sampler.record(buffer.len() as u64) {
                progress(mbps);
            }
        }
        file.sync_all().await?;

        if let Some(mbps) = sampler.finish() {
            progress(mbps);
        }

        info!("Transferred {} bytes to {}", written, dest.display());
        Ok(written)
    }
}
