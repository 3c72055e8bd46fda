// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog client for Door43-style `catalog/search` listings.
//!
//! Only the fields needed to build a [`ResourceDescriptor`] are decoded.
//! Entries without a version tag or archive URL cannot be installed and are
//! dropped with a debug log.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::CatalogSource;
use crate::error::{Result, SyncError};
use crate::types::{install_language, ResourceDescriptor, DEFAULT_OWNER, EPOCH_ZERO};

/// Default catalog listing endpoint.
pub const DEFAULT_CATALOG_URL: &str =
    "https://git.door43.org/api/v1/catalog/search?stage=prod&limit=1000";

/// Top-level catalog response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub data: Vec<CatalogEntry>,
}

/// Release section of a catalog entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogRelease {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
}

/// One repository in the catalog listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    /// Repository name, `<language>_<resource>`.
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub released: Option<String>,
    #[serde(default)]
    pub branch_or_tag_name: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub release: Option<CatalogRelease>,
}

impl CatalogEntry {
    /// Build a descriptor, or `None` when the entry is not installable.
    pub fn to_descriptor(&self) -> Option<ResourceDescriptor> {
        let (name_lang, name_res) = self.name.split_once('_')?;
        let language = install_language(self.language.as_deref().unwrap_or(name_lang)).to_string();
        let release = self.release.clone().unwrap_or_default();

        let version = release
            .tag_name
            .or_else(|| self.branch_or_tag_name.clone())
            .filter(|v| !v.trim().is_empty())?;
        let url = release
            .zipball_url
            .or_else(|| self.zipball_url.clone())
            .filter(|u| !u.trim().is_empty())?;

        Some(
            ResourceDescriptor::new(
                language,
                name_res.to_ascii_lowercase(),
                self.owner.clone().unwrap_or_else(|| DEFAULT_OWNER.to_string()),
                version,
            )
            .with_subject(self.subject.clone().unwrap_or_default())
            .with_url(url)
            .with_modified(self.released.clone().unwrap_or_else(|| EPOCH_ZERO.to_string())),
        )
    }
}

/// Decode a catalog response body.
pub fn parse_catalog(body: &str) -> Result<Vec<ResourceDescriptor>> {
    let response: CatalogResponse =
        serde_json::from_str(body).map_err(|e| SyncError::Catalog(format!("invalid catalog JSON: {}", e)))?;

    let mut descriptors = Vec::with_capacity(response.data.len());
    for entry in &response.data {
        match entry.to_descriptor() {
            Some(d) => descriptors.push(d),
            None => tracing::debug!("Skipping catalog entry {} without a release", entry.name),
        }
    }
    Ok(descriptors)
}

/// Fetches the catalog listing over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tcsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Catalog(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_catalog(&self) -> Result<Vec<ResourceDescriptor>> {
        tracing::debug!("Fetching catalog from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Catalog(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(SyncError::Catalog(format!(
                "{} returned HTTP {}",
                self.url,
                response.status().as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Catalog(format!("{}: {}", self.url, e)))?;
        let descriptors = parse_catalog(&body)?;
        tracing::info!("Catalog lists {} installable resources", descriptors.len());
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "ok": true,
        "data": [
            {
                "name": "en_tn",
                "owner": "unfoldingWord",
                "language": "en",
                "subject": "TSV Translation Notes",
                "released": "2023-05-01T12:00:00Z",
                "release": {
                    "tag_name": "v72",
                    "zipball_url": "https://git.door43.org/unfoldingWord/en_tn/archive/v72.zip"
                }
            },
            {
                "name": "el-x-koine_ugnt",
                "owner": "unfoldingWord",
                "language": "el-x-koine",
                "subject": "Greek New Testament",
                "branch_or_tag_name": "v0.34",
                "zipball_url": "https://git.door43.org/unfoldingWord/el-x-koine_ugnt/archive/v0.34.zip"
            },
            { "name": "en_draft", "owner": "someone" }
        ]
    }"#;

    #[test]
    fn test_parse_catalog_entries() {
        let descriptors = parse_catalog(SAMPLE).unwrap();
        assert_eq!(descriptors.len(), 2);

        let tn = &descriptors[0];
        assert_eq!(tn.language_id, "en");
        assert_eq!(tn.resource_id, "tn");
        assert_eq!(tn.version, "v72");
        assert_eq!(tn.remote_modified_time, "2023-05-01T12:00:00Z");

        let ugnt = &descriptors[1];
        assert_eq!(ugnt.language_id, "grc");
        assert_eq!(ugnt.resource_id, "ugnt");
        assert_eq!(ugnt.version, "v0.34");
        assert_eq!(ugnt.remote_modified_time, EPOCH_ZERO);
    }

    #[test]
    fn test_invalid_json_is_catalog_error() {
        assert!(matches!(parse_catalog("not json"), Err(SyncError::Catalog(_))));
    }
}
