// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network seams: archive downloads and catalog fetches.
//!
//! The orchestrator only talks to the [`Transport`] and [`CatalogSource`]
//! traits, so tests can serve archives from memory. The HTTP
//! implementations live in [`http`] and [`catalog`].

pub mod catalog;
pub mod http;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TransportError};
use crate::types::ResourceDescriptor;

pub use catalog::{CatalogEntry, HttpCatalog};
pub use http::HttpTransport;

/// Result of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// HTTP status of the final attempt.
    pub status: u16,
    /// Where the body was written.
    pub dest: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// Downloads a URL to a file.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download `url` into `dest`, retrying transient failures internally.
    ///
    /// On failure no partial file is left at `dest`.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<DownloadOutcome, TransportError>;
}

/// Source of remote resource descriptors.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<ResourceDescriptor>>;
}

/// Run `attempt` until it succeeds, fails permanently, or `max_attempts`
/// transient failures have happened.
///
/// The partial file at `dest` is removed after every failed attempt. After
/// the last transient failure the error is [`TransportError::Timeout`]
/// carrying the number of attempts made.
pub async fn retry_on_timeout<F, Fut, T>(
    url: &str,
    dest: &Path,
    max_attempts: u32,
    retry_delay: Duration,
    mut attempt: F,
) -> std::result::Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, TransportError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt(tries).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                remove_partial(dest).await;
                if !err.is_transient() {
                    return Err(err);
                }
                if tries >= max_attempts {
                    return Err(TransportError::Timeout {
                        url: url.to_string(),
                        attempts: tries,
                    });
                }
                tracing::warn!(
                    "Download of {} timed out (attempt {}/{}), retrying",
                    url,
                    tries,
                    max_attempts
                );
                tokio::time::sleep(retry_delay * tries).await;
            }
        }
    }
}

async fn remove_partial(dest: &Path) {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            tracing::warn!("Failed to remove partial download {:?}: {}", dest, e);
        }
    }
}
