// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP implementation of [`Transport`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::{retry_on_timeout, DownloadOutcome, Transport};
use crate::error::TransportError;

/// Default per-request timeout (in seconds).
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts per download.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts; multiplied by the attempt number.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Streaming downloader with bounded retry on timeouts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    /// Create a transport with default timeout and retry settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_settings(
            Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }

    /// Create a transport with explicit settings.
    pub fn with_settings(
        timeout: Duration,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("tcsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_attempts,
            retry_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::Io { path: parent.to_path_buf(), source: e })?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TransportError::Io { path: dest.to_path_buf(), source: e })?;

        let mut bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransportError::Io { path: dest.to_path_buf(), source: e })?;
            bytes += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| TransportError::Io { path: dest.to_path_buf(), source: e })?;

        tracing::debug!("Downloaded {} ({} bytes) to {:?}", url, bytes, dest);
        Ok(DownloadOutcome {
            status: status.as_u16(),
            dest: dest.to_path_buf(),
            bytes,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, TransportError> {
        retry_on_timeout(url, dest, self.max_attempts, self.retry_delay, |_| {
            self.download_once(url, dest)
        })
        .await
    }
}

/// Map a reqwest error to a transport error. Only timeouts are transient.
pub(crate) fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            attempts: 1,
        }
    } else if let Some(status) = err.status() {
        TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
