// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local inventory scanning.
//!
//! Walks the resource root and produces one [`LocalResourceRecord`] per
//! resource line (language, resource, owner), taken from the latest version
//! directory of that owner.
//!
//! ```text
//! <root>/<lang>/bibles/<id>/v<version>[_<owner>]/manifest.json
//! <root>/<lang>/translationHelps/<kind>/v<version>[_<owner>]/manifest.json
//! ```
//!
//! Problems with a single package (no manifest, bad JSON) are logged and
//! skipped. The scan as a whole only fails if the root cannot be created.

pub mod manifest;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::types::{LocalResourceRecord, ResourceKind, BIBLES_DIR, HELPS_DIR};
use crate::version::{versioned_dirs, VersionedDirectory};

pub use manifest::{read_manifest, write_manifest, InstalledManifest, MANIFEST_JSON};

/// Scan the resource root. Creates the root when it does not exist.
pub fn scan(resource_root: &Path) -> Result<Vec<LocalResourceRecord>> {
    if !resource_root.exists() {
        fs::create_dir_all(resource_root).map_err(|e| SyncError::io(resource_root, e))?;
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for lang_dir in child_dirs(resource_root) {
        let Some(language_id) = dir_name(&lang_dir) else {
            continue;
        };

        for resource_dir in child_dirs(&lang_dir.join(BIBLES_DIR)) {
            if let Some(id) = dir_name(&resource_dir) {
                records.extend(scan_resource(&language_id, &id, &resource_dir));
            }
        }

        for kind_dir in child_dirs(&lang_dir.join(HELPS_DIR)) {
            let Some(kind_name) = dir_name(&kind_dir) else {
                continue;
            };
            let id = ResourceKind::resource_id_for_helps_dir(&kind_name)
                .map(str::to_string)
                .unwrap_or(kind_name);
            records.extend(scan_resource(&language_id, &id, &kind_dir));
        }
    }

    records.sort_by(|a, b| a.key().cmp(&b.key()));
    tracing::debug!("Scanned {} local resources under {:?}", records.len(), resource_root);
    Ok(records)
}

/// Records for one resource directory: the latest version per owner.
fn scan_resource(language_id: &str, fallback_id: &str, resource_dir: &Path) -> Vec<LocalResourceRecord> {
    let mut latest_by_owner: BTreeMap<String, (VersionedDirectory, PathBuf)> = BTreeMap::new();
    // versioned_dirs is ascending, so the last write per owner wins.
    for (dir, path) in versioned_dirs(resource_dir) {
        latest_by_owner.insert(dir.effective_owner().to_string(), (dir, path));
    }

    latest_by_owner
        .into_iter()
        .filter_map(|(owner, (dir, path))| {
            let manifest = match read_manifest(&path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", path, e);
                    return None;
                }
            };
            Some(LocalResourceRecord {
                language_id: language_id.to_string(),
                resource_id: manifest
                    .resource_id
                    .clone()
                    .unwrap_or_else(|| fallback_id.to_string()),
                owner,
                version: dir.version.clone(),
                modified_time: manifest.modified_time(),
                path,
            })
        })
        .collect()
}

/// Visible subdirectories of `path`; empty when `path` is missing.
pub(crate) fn child_dirs(path: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| dir_name(p).is_some_and(|n| !n.starts_with('.')))
        .collect();
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install(root: &Path, rel: &str, manifest: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_JSON), manifest).unwrap();
    }

    #[test]
    fn test_missing_root_is_created_and_empty() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("resources");
        assert!(scan(&root).unwrap().is_empty());
        assert!(root.is_dir());
    }

    #[test]
    fn test_scan_latest_per_owner() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        install(root, "grc/bibles/ugnt/v0.13_unfoldingWord", r#"{"version":"0.13"}"#);
        install(
            root,
            "grc/bibles/ugnt/v0.14_unfoldingWord",
            r#"{"version":"0.14","remote_modified_time":"2021-01-01T00:00:00Z"}"#,
        );
        install(root, "grc/bibles/ugnt/v1", r#"{"version":"1","catalog_modified_time":"2019-01-01T00:00:00Z"}"#);

        let records = scan(root).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].owner, "Door43-Catalog");
        assert_eq!(records[0].version, "1");
        assert_eq!(records[0].modified_time.as_deref(), Some("2019-01-01T00:00:00Z"));
        assert_eq!(records[1].owner, "unfoldingWord");
        assert_eq!(records[1].version, "0.14");
    }

    #[test]
    fn test_helps_dir_maps_to_resource_id() {
        let temp = TempDir::new().unwrap();
        install(
            temp.path(),
            "en/translationHelps/translationNotes/v40_unfoldingWord",
            r#"{"version":"40"}"#,
        );
        let records = scan(temp.path()).unwrap();
        assert_eq!(records[0].resource_id, "tn");
        assert_eq!(records[0].language_id, "en");
    }

    #[test]
    fn test_bad_package_does_not_abort_scan() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        install(root, "en/bibles/ult/v1_unfoldingWord", "not json");
        fs::create_dir_all(root.join("en/bibles/ust/v1_unfoldingWord")).unwrap();
        install(root, "hbo/bibles/uhb/v2.1_unfoldingWord", r#"{"version":"2.1"}"#);
        fs::create_dir_all(root.join(".staging/leftover")).unwrap();

        let records = scan(root).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resource_id, "uhb");
    }
}
