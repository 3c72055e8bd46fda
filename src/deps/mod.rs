// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-resource version pins.
//!
//! Dependent packages (notes, word links, questions) are aligned to one
//! exact release of an original-language Bible. Their manifests declare it
//! as a relation:
//!
//! ```text
//! dublin_core:
//!   relation:
//!     - en/ult
//!     - el-x-koine/ugnt?v=0.14
//!     - hbo/uhb?v=2.1.15
//! ```
//!
//! Only relations naming a prerequisite kind and carrying `?v=` are pins.
//! Pins are resolved before the dependent's processor runs, and they are
//! consulted again when pruning so pinned versions stay on disk.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::inventory::{child_dirs, read_manifest, InstalledManifest};
use crate::types::{
    install_language, resource_dir, ResourceDescriptor, ResourceKind, DEFAULT_OWNER, HELPS_DIR,
};
use crate::version::{bare, find_version_dir, versioned_dirs};

/// Default host serving repository archives.
pub const DEFAULT_CONTENT_BASE_URL: &str = "https://git.door43.org";

/// Exact version requirement from a dependent package on a prerequisite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyPin {
    /// Language the prerequisite installs under (`grc`).
    pub language_id: String,
    /// Language as written in the relation (`el-x-koine`).
    pub relation_language: String,
    pub resource_id: String,
    /// Bare version (`0.14`).
    pub version: String,
    /// Owner of the dependent; pins resolve within that owner.
    pub owner: String,
}

impl DependencyPin {
    /// Parse one relation entry. Returns `None` for anything that is not a
    /// versioned reference to a prerequisite kind.
    pub fn parse(relation: &str, owner: &str) -> Option<Self> {
        let (path, query) = relation.trim().split_once('?')?;
        let (relation_language, resource_id) = path.split_once('/')?;
        let resource_id = resource_id.trim_matches('/').to_ascii_lowercase();
        if relation_language.is_empty()
            || !ResourceKind::from_resource_id(&resource_id).is_prerequisite()
        {
            return None;
        }

        let version = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "v")
            .map(|(_, v)| bare(v.trim()).to_string())
            .filter(|v| !v.is_empty())?;

        Some(Self {
            language_id: install_language(relation_language).to_string(),
            relation_language: relation_language.to_string(),
            resource_id,
            version,
            owner: owner.to_string(),
        })
    }

    /// Directory holding every installed version of the pinned resource.
    pub fn resource_dir(&self, root: &Path) -> PathBuf {
        resource_dir(
            root,
            &self.language_id,
            &self.resource_id,
            ResourceKind::OriginalLanguageBible,
        )
    }

    /// Installed directory satisfying this pin, falling back to the default
    /// owner's copy.
    pub fn find_installed(&self, root: &Path) -> Option<PathBuf> {
        find_version_dir(&self.resource_dir(root), &self.version, &self.owner, true)
    }

    /// Descriptor used to fetch the pinned release on demand.
    pub fn descriptor(&self, content_base_url: &str) -> ResourceDescriptor {
        let url = format!(
            "{}/{}/{}_{}/archive/v{}.zip",
            content_base_url.trim_end_matches('/'),
            self.owner,
            self.relation_language,
            self.resource_id,
            self.version
        );
        ResourceDescriptor::new(
            &self.language_id,
            &self.resource_id,
            &self.owner,
            format!("v{}", self.version),
        )
        .with_url(url)
    }

    /// Lock key for fetches of this exact release.
    pub fn fetch_key(&self) -> String {
        format!(
            "{}/{}@{} v{}",
            self.language_id, self.resource_id, self.owner, self.version
        )
    }
}

impl fmt::Display for DependencyPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fetch_key())
    }
}

/// A pin together with the directory that satisfies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPin {
    pub pin: DependencyPin,
    pub path: PathBuf,
}

/// Pins declared by a manifest, owned by `owner`.
pub fn pins_for(manifest: &InstalledManifest, owner: &str) -> Vec<DependencyPin> {
    let mut pins: Vec<DependencyPin> = manifest
        .relation_entries()
        .iter()
        .filter_map(|r| DependencyPin::parse(r, owner))
        .collect();
    pins.sort_by(|a, b| a.fetch_key().cmp(&b.fetch_key()));
    pins.dedup();
    pins
}

/// Versions of `language_id/resource_id` pinned by any installed dependent.
///
/// Scans every version directory of every `translationHelps` kind. Pins
/// from another owner count when `owner` is the default owner, since
/// lookups fall back to the default owner's copy.
pub fn pinned_versions(
    root: &Path,
    language_id: &str,
    resource_id: &str,
    owner: &str,
) -> BTreeSet<String> {
    let mut versions = BTreeSet::new();
    for lang_dir in child_dirs(root) {
        for kind_dir in child_dirs(&lang_dir.join(HELPS_DIR)) {
            for (dir, path) in versioned_dirs(&kind_dir) {
                let manifest = match read_manifest(&path) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                for pin in pins_for(&manifest, dir.effective_owner()) {
                    if pin.language_id == language_id
                        && pin.resource_id.eq_ignore_ascii_case(resource_id)
                        && (pin.owner == owner || owner == DEFAULT_OWNER)
                    {
                        versions.insert(pin.version);
                    }
                }
            }
        }
    }
    versions
}
