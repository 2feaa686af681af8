//! HTTP plumbing shared by the content providers.

use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::providers::ProviderError;

/// Network settings for content providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Limit for establishing a connection (default 30 s)
    pub connect_timeout: Duration,

    /// Limit for a whole metadata request (default 60 s). Downloads are
    /// streamed and only bounded by the connect timeout.
    pub request_timeout: Duration,

    /// Delay before every request when throttling is on (default 1 s)
    pub throttle_delay: Duration,

    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            throttle_delay: Duration::from_secs(1),
            user_agent: format!("geoextent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Cheaply cloneable HTTP client handed to every provider instance.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    config: ProviderConfig,
    throttle: bool,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self {
            http,
            config,
            throttle: false,
        })
    }

    /// Enables or disables the delay before each request.
    pub fn with_throttle(mut self, throttle: bool) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn is_throttled(&self) -> bool {
        self.throttle
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn pause(&self) {
        if self.throttle && !self.config.throttle_delay.is_zero() {
            debug!(delay_ms = self.config.throttle_delay.as_millis() as u64, "Throttling request");
            tokio::time::sleep(self.config.throttle_delay).await;
        }
    }

    /// GETs `url` as JSON. Non-success statuses are errors.
    pub async fn get_json(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.pause().await;
        debug!(url, "Requesting metadata");
        self.http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }

    /// Streams `url` into the file at `dest` and returns the bytes written.
    ///
    /// A partially written file is removed before the error is returned.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ProviderError> {
        self.pause().await;
        let download_error = |source| ProviderError::Download {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_error)?;

        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| ProviderError::Io {
                path: dest.to_path_buf(),
                source,
            })?;

        let result = stream_body(response, file, url, dest).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(dest).await {
                debug!(path = %dest.display(), error = %e, "Could not remove partial download");
            }
        }
        result
    }
}

async fn stream_body(
    response: reqwest::Response,
    mut file: tokio::fs::File,
    url: &str,
    dest: &Path,
) -> Result<u64, ProviderError> {
    let io_error = |source| ProviderError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| ProviderError::Download {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;

    Ok(written)
}
