// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Version reconciliation.
//!
//! After an install, older version directories of the same owner are
//! removed. The newest one always survives, as does any version pinned by
//! an installed dependent.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::deps::pinned_versions;
use crate::error::{Result, SyncError};
use crate::inventory::child_dirs;
use crate::types::{ResourceKind, BIBLES_DIR};
use crate::version::{same_version, versioned_dirs};

/// Remove superseded version directories of `owner` under `resource_dir`.
///
/// Keeps the maximal version and any version in `keep_versions` (compared
/// with the leading `v` stripped). Returns `false` when the owner has zero
/// or one version directories, `true` otherwise.
pub fn prune(resource_dir: &Path, keep_versions: &BTreeSet<String>, owner: &str) -> Result<bool> {
    let dirs: Vec<_> = versioned_dirs(resource_dir)
        .into_iter()
        .filter(|(dir, _)| dir.belongs_to(owner))
        .collect();
    if dirs.len() <= 1 {
        return Ok(false);
    }

    // Ascending order; the last entry is the latest.
    let (_, latest) = &dirs[dirs.len() - 1];
    for (dir, path) in &dirs {
        if path == latest || keep_versions.iter().any(|k| same_version(k, &dir.version)) {
            continue;
        }
        tracing::info!("Removing superseded version {:?}", path);
        fs::remove_dir_all(path).map_err(|e| SyncError::io(path, e))?;
    }
    Ok(true)
}

/// Prune every installed prerequisite resource, honoring all pins on disk.
///
/// Runs once per batch after every item has finished, so pins declared by
/// dependents installed in the same batch are already visible. Returns the
/// number of resource directories that were pruned.
pub fn reconcile_prerequisites(root: &Path) -> Result<usize> {
    let mut pruned = 0;
    for lang_dir in child_dirs(root) {
        let Some(language_id) = lang_dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        for resource in child_dirs(&lang_dir.join(BIBLES_DIR)) {
            let Some(resource_id) = resource.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if !ResourceKind::from_resource_id(&resource_id).is_prerequisite() {
                continue;
            }

            let owners: BTreeSet<String> = versioned_dirs(&resource)
                .into_iter()
                .map(|(dir, _)| dir.effective_owner().to_string())
                .collect();
            for owner in owners {
                let keep = pinned_versions(root, &language_id, &resource_id, &owner);
                if prune(&resource, &keep, &owner)? {
                    pruned += 1;
                }
            }
        }
    }
    tracing::debug!("Reconciled prerequisites: {} resource directories pruned", pruned);
    Ok(pruned)
}
