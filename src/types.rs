// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across tcsync.
//!
//! This module provides the resource identity types shared by the scanner,
//! planner, orchestrator and reconciler.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Owner used by the catalog for resources published without an explicit
/// organization, and assumed for version directories without an owner suffix.
pub const DEFAULT_OWNER: &str = "Door43-Catalog";

/// Timestamp meaning "unknown / never modified".
pub const EPOCH_ZERO: &str = "0001-01-01T00:00:00+00:00";

/// Directory under a language that holds Bible resources.
pub const BIBLES_DIR: &str = "bibles";

/// Directory under a language that holds translation helps.
pub const HELPS_DIR: &str = "translationHelps";

/// Map a published language code to the directory it installs under.
///
/// Koine Greek is published as `el-x-koine` but installed as `grc`.
pub fn install_language(language_id: &str) -> &str {
    match language_id {
        "el-x-koine" => "grc",
        other => other,
    }
}

/// Parse a catalog or manifest timestamp.
///
/// Accepts RFC 3339 and the offset-less `YYYY-MM-DDTHH:MM:SS` form (read as
/// UTC). Empty strings and the [`EPOCH_ZERO`] sentinel are treated as absent.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })?;
    let sentinel = DateTime::parse_from_rfc3339(EPOCH_ZERO).ok()?;
    if parsed <= sentinel {
        return None;
    }
    Some(parsed)
}

/// Kind of resource, derived from the catalog subject and resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Greek or Hebrew source text; other kinds pin versions of it.
    OriginalLanguageBible,
    /// Gateway or target language Bible.
    Bible,
    TranslationWords,
    TranslationAcademy,
    TranslationNotes,
    TranslationWordsLinks,
    TranslationQuestions,
    /// Anything else; installed by plain copy.
    Other,
}

impl ResourceKind {
    /// Classify a resource from its subject, falling back to its id.
    pub fn classify(subject: &str, resource_id: &str) -> Self {
        match subject.trim().to_ascii_lowercase().as_str() {
            "greek new testament" | "hebrew old testament" => return Self::OriginalLanguageBible,
            "bible" | "aligned bible" => return Self::Bible,
            "translation words" => return Self::TranslationWords,
            "translation academy" => return Self::TranslationAcademy,
            "tsv translation notes" | "translation notes" => return Self::TranslationNotes,
            "tsv translation words links" | "translation words links" => {
                return Self::TranslationWordsLinks
            }
            "tsv translation questions" | "translation questions" => {
                return Self::TranslationQuestions
            }
            _ => {}
        }
        Self::from_resource_id(resource_id)
    }

    /// Classify from a resource id alone.
    pub fn from_resource_id(resource_id: &str) -> Self {
        match resource_id.to_ascii_lowercase().as_str() {
            "ugnt" | "uhb" => Self::OriginalLanguageBible,
            "ult" | "ust" | "ulb" | "udb" | "glt" | "gst" | "t4t" | "bsb" => Self::Bible,
            "tw" => Self::TranslationWords,
            "ta" => Self::TranslationAcademy,
            "tn" => Self::TranslationNotes,
            "twl" => Self::TranslationWordsLinks,
            "tq" => Self::TranslationQuestions,
            _ => Self::Other,
        }
    }

    /// Recover a resource id from a `translationHelps` directory name.
    pub fn resource_id_for_helps_dir(dir_name: &str) -> Option<&'static str> {
        match dir_name {
            "translationWords" => Some("tw"),
            "translationAcademy" => Some("ta"),
            "translationNotes" => Some("tn"),
            "translationWordsLinks" => Some("twl"),
            "translationQuestions" => Some("tq"),
            _ => None,
        }
    }

    /// The kind other kinds pin to, and which is not pruned per item.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Self::OriginalLanguageBible)
    }

    /// Kinds whose packages pin prerequisite versions.
    pub fn is_dependent(&self) -> bool {
        matches!(
            self,
            Self::TranslationNotes | Self::TranslationWordsLinks | Self::TranslationQuestions
        )
    }

    pub fn is_bible(&self) -> bool {
        matches!(self, Self::OriginalLanguageBible | Self::Bible)
    }
}

/// A unique downloadable unit from the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub language_id: String,
    pub resource_id: String,
    pub owner: String,
    /// Dotted numeric string, possibly prefixed with a letter.
    pub version: String,
    /// Catalog subject, selects the format processor.
    pub subject: String,
    pub download_url: String,
    /// Remote modification time; [`EPOCH_ZERO`] when unknown.
    pub remote_modified_time: String,
}

impl ResourceDescriptor {
    pub fn new(
        language_id: impl Into<String>,
        resource_id: impl Into<String>,
        owner: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            language_id: language_id.into(),
            resource_id: resource_id.into(),
            owner: owner.into(),
            version: version.into(),
            subject: String::new(),
            download_url: String::new(),
            remote_modified_time: EPOCH_ZERO.to_string(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = url.into();
        self
    }

    pub fn with_modified(mut self, modified: impl Into<String>) -> Self {
        self.remote_modified_time = modified.into();
        self
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::classify(&self.subject, &self.resource_id)
    }

    /// Version without a leading letter prefix (`v1.2` -> `1.2`).
    pub fn bare_version(&self) -> &str {
        self.version.trim_start_matches(|c: char| c.is_ascii_alphabetic())
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.language_id, &self.resource_id, &self.owner)
    }

    /// Human-readable identity used to tag errors and logs.
    pub fn identity(&self) -> String {
        format!(
            "{}/{}@{} v{}",
            self.language_id,
            self.resource_id,
            self.owner,
            self.bare_version()
        )
    }

    /// Filesystem-safe unique name, used for staging directories.
    pub fn staging_name(&self) -> String {
        format!(
            "{}_{}_{}_v{}",
            self.language_id,
            self.resource_id,
            self.owner,
            self.bare_version()
        )
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '-' })
        .collect()
    }

    /// Check the identity fields needed before any work starts.
    pub fn validate(&self) -> Result<()> {
        let fields: [(&'static str, &str); 5] = [
            ("language_id", &self.language_id),
            ("resource_id", &self.resource_id),
            ("owner", &self.owner),
            ("version", &self.version),
            ("download_url", &self.download_url),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(SyncError::MissingIdentity {
                    resource: self.identity(),
                    field,
                });
            }
        }
        Ok(())
    }

    /// Path of the directory holding all versions of this resource.
    pub fn resource_dir(&self, root: &std::path::Path) -> PathBuf {
        resource_dir(root, &self.language_id, &self.resource_id, self.kind())
    }
}

/// Directory holding every version of one resource.
pub fn resource_dir(
    root: &std::path::Path,
    language_id: &str,
    resource_id: &str,
    kind: ResourceKind,
) -> PathBuf {
    let lang = root.join(language_id);
    match kind {
        ResourceKind::OriginalLanguageBible | ResourceKind::Bible => {
            lang.join(BIBLES_DIR).join(resource_id)
        }
        ResourceKind::TranslationWords => lang.join(HELPS_DIR).join("translationWords"),
        ResourceKind::TranslationAcademy => lang.join(HELPS_DIR).join("translationAcademy"),
        ResourceKind::TranslationNotes => lang.join(HELPS_DIR).join("translationNotes"),
        ResourceKind::TranslationWordsLinks => lang.join(HELPS_DIR).join("translationWordsLinks"),
        ResourceKind::TranslationQuestions => lang.join(HELPS_DIR).join("translationQuestions"),
        ResourceKind::Other => lang.join(HELPS_DIR).join(resource_id),
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// (language, resource, owner) triple identifying a resource line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub language_id: String,
    pub resource_id: String,
    pub owner: String,
}

impl ResourceKey {
    pub fn new(language_id: &str, resource_id: &str, owner: &str) -> Self {
        Self {
            language_id: language_id.to_string(),
            resource_id: resource_id.to_ascii_lowercase(),
            owner: owner.to_string(),
        }
    }
}

/// An installed version directory as seen by the inventory scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalResourceRecord {
    pub language_id: String,
    pub resource_id: String,
    pub owner: String,
    /// Version from the directory name, owner suffix and `v` stripped.
    pub version: String,
    /// Recorded modification time; `None` when absent or the sentinel.
    pub modified_time: Option<String>,
    /// Version directory on disk.
    pub path: PathBuf,
}

impl LocalResourceRecord {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.language_id, &self.resource_id, &self.owner)
    }
}
