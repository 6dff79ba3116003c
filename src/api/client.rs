use std::time::Duration;

use futures::Stream;
use futures::TryStreamExt;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use super::models::CatalogConfig;
use crate::config::TransferConfig;
use crate::domain::ContentType;

const DEFAULT_EXTENSION: &str = "mp4";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiClient {
    config: CatalogConfig,
    http: Client,
}

impl ApiClient {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    /// Builds the shared HTTP client with the configured timeouts.
    pub fn with_transfer_config(config: CatalogConfig, transfer: &TransferConfig) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(transfer.connect_timeout_secs));
        if let Some(secs) = transfer.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            config,
            http: builder.build()?,
        })
    }

    /// Stream URL for a movie or episode:
    /// `{server}/{movie|series}/{user}/{pass}/{id}.{ext}`
    pub fn stream_url(&self, content_type: ContentType, stream_id: u64, extension: &str) -> String {
        let extension = extension.trim_start_matches('.');
        let extension = if extension.is_empty() {
            DEFAULT_EXTENSION
        } else {
            extension
        };

        format!(
            "{}/{}/{}/{}/{}.{}",
            self.config.server_url.trim_end_matches('/'),
            content_type.as_str(),
            self.config.username,
            self.config.password,
            stream_id,
            extension
        )
    }

    /// Opens a download and returns (content length, body stream).
    pub async fn download_file_stream(
        &self,
        download_url: &str,
    ) -> Result<(Option<u64>, impl Stream<Item = Result<bytes::Bytes>>)> {
        let response = self.http.get(download_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let total_size = response.content_length();
        let stream = response.bytes_stream().map_err(ApiError::RequestError);

        Ok((total_size, stream))
    }
}

/// Container extension of a stream URL, `mp4` when the path has none.
pub fn extension_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let segment = parsed.path_segments()?.next_back()?.to_string();
            let (_, ext) = segment.rsplit_once('.')?;
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                Some(ext.to_ascii_lowercase())
            } else {
                None
            }
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Numeric stream id at the end of a stream URL, e.g. `.../482.mkv` gives 482.
pub fn stream_id_from_url(url: &str) -> Option<u64> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let stem = segment.split('.').next()?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn test_config(server_url: &str) -> CatalogConfig {
        CatalogConfig {
            server_url: server_url.to_string(),
            username: "alice".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_stream_url() {
        let client = ApiClient::new(test_config("http://tv.example:8080/"));
        assert_eq!(
            client.stream_url(ContentType::Series, 482, "mkv"),
            "http://tv.example:8080/series/alice/secret/482.mkv"
        );
        assert_eq!(
            client.stream_url(ContentType::Movie, 9, ""),
            "http://tv.example:8080/movie/alice/secret/9.mp4"
        );
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("http://x/series/a/b/1.MKV"), "mkv");
        assert_eq!(extension_from_url("http://x/e1.mp4?token=abc"), "mp4");
        assert_eq!(extension_from_url("http://x/live/stream"), "mp4");
        assert_eq!(extension_from_url("not a url"), "mp4");
    }

    #[test]
    fn test_stream_id_from_url() {
        assert_eq!(stream_id_from_url("http://x/series/a/b/482.mkv"), Some(482));
        assert_eq!(stream_id_from_url("http://x/movie/a/b/7"), Some(7));
        assert_eq!(stream_id_from_url("http://x/live/stream.ts"), None);
        assert_eq!(stream_id_from_url("482"), None);
    }

    #[tokio::test]
    async fn test_download_file_stream() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/movie/alice/secret/3.mp4")
            .with_status(200)
            .with_body("0123456789")
            .create_async()
            .await;

        let client = ApiClient::new(test_config(&server.url()));
        let url = client.stream_url(ContentType::Movie, 3, "mp4");
        let (total, stream) = client.download_file_stream(&url).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();

        assert_eq!(total, Some(10));
        assert_eq!(body, b"0123456789");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_file_stream_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.mp4")
            .with_status(404)
            .create_async()
            .await;

        let client = ApiClient::new(test_config(&server.url()));
        let result = client
            .download_file_stream(&format!("{}/missing.mp4", server.url()))
            .await;
        assert!(matches!(result, Err(ApiError::Status(404))));
    }
}
