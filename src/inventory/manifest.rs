// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Package manifests.
//!
//! Every installed version directory carries a `manifest.json`. Fields this
//! crate does not know about are kept verbatim so re-writing a manifest never
//! loses data from the upstream package.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::types::{parse_timestamp, ResourceDescriptor};

/// File name of the installed manifest.
pub const MANIFEST_JSON: &str = "manifest.json";

/// File name of an upstream resource-container manifest.
pub const MANIFEST_YAML: &str = "manifest.yaml";

/// Contents of `manifest.json` in an installed version directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstalledManifest {
    #[serde(default)]
    pub version: String,
    /// Catalog time written at install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_modified_time: Option<String>,
    /// Remote modification time cached from the descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Relation records (`<language>/<resource>?v=<version>`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstalledManifest {
    /// Best known modification time: cached remote time first, then the
    /// catalog time. The epoch-zero sentinel counts as absent.
    pub fn modified_time(&self) -> Option<String> {
        [&self.remote_modified_time, &self.catalog_modified_time]
            .into_iter()
            .flatten()
            .find(|t| parse_timestamp(t).is_some())
            .cloned()
    }

    /// Relation entries, from our own field or the upstream
    /// `dublin_core.relation` list.
    pub fn relation_entries(&self) -> Vec<String> {
        if !self.relations.is_empty() {
            return self.relations.clone();
        }
        self.extra
            .get("dublin_core")
            .and_then(|dc| dc.get("relation"))
            .and_then(|rel| rel.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stamp identity and times from the descriptor being installed.
    pub fn stamp(&mut self, descriptor: &ResourceDescriptor, relations: Vec<String>) {
        self.version = descriptor.bare_version().to_string();
        self.catalog_modified_time = Some(descriptor.remote_modified_time.clone());
        self.remote_modified_time = Some(descriptor.remote_modified_time.clone());
        self.owner = Some(descriptor.owner.clone());
        self.language_id = Some(descriptor.language_id.clone());
        self.resource_id = Some(descriptor.resource_id.clone());
        if !descriptor.subject.is_empty() {
            self.subject = Some(descriptor.subject.clone());
        }
        self.relations = relations;
    }
}

/// Read `manifest.json` from a version directory.
pub fn read_manifest(dir: &Path) -> Result<InstalledManifest> {
    let path = dir.join(MANIFEST_JSON);
    let content = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
    serde_json::from_str(&content).map_err(|e| SyncError::json(&path, e))
}

/// Read the manifest of a freshly extracted package.
///
/// Prefers `manifest.json`, then `manifest.yaml`. A package with neither
/// gets an empty manifest.
pub fn read_staged_manifest(dir: &Path) -> Result<InstalledManifest> {
    if dir.join(MANIFEST_JSON).is_file() {
        return read_manifest(dir);
    }
    let yaml_path = dir.join(MANIFEST_YAML);
    if !yaml_path.is_file() {
        return Ok(InstalledManifest::default());
    }
    let content = fs::read_to_string(&yaml_path).map_err(|e| SyncError::io(&yaml_path, e))?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| SyncError::Yaml {
        path: yaml_path.clone(),
        source: e,
    })?;
    let Value::Object(map) = value else {
        return Ok(InstalledManifest::default());
    };
    // Upstream manifests keep the version under dublin_core.
    let mut manifest: InstalledManifest =
        serde_json::from_value(Value::Object(map)).map_err(|e| SyncError::json(&yaml_path, e))?;
    if manifest.version.is_empty() {
        if let Some(v) = manifest
            .extra
            .get("dublin_core")
            .and_then(|dc| dc.get("version"))
            .and_then(|v| v.as_str())
        {
            manifest.version = v.to_string();
        }
    }
    Ok(manifest)
}

/// Write `manifest.json` into a directory with temp-file + rename.
pub fn write_manifest(dir: &Path, manifest: &InstalledManifest) -> Result<()> {
    let path = dir.join(MANIFEST_JSON);
    let temp_path = dir.join(format!(".{}.{}.tmp", MANIFEST_JSON, std::process::id()));
    let content = serde_json::to_string_pretty(manifest).map_err(|e| SyncError::json(&path, e))?;

    {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| SyncError::io(&temp_path, e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| SyncError::io(&temp_path, e))?;
        temp_file.sync_all().map_err(|e| SyncError::io(&temp_path, e))?;
    }

    fs::rename(&temp_path, &path).map_err(|e| SyncError::io(&path, e))
}
