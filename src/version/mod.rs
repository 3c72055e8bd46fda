// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Version ordering for resource directories.
//!
//! Version tokens come from directory names like `v0.14_unfoldingWord` and
//! catalog tags like `v40`. They are coerced to `major.minor.patch`
//! (missing components default to 0, leading letters are ignored) and then
//! compared as semver versions.
//!
//! Tokens that cannot be coerced never cause an error: they sort below
//! every coercible token.
//!
//! # Example
//!
//! ```
//! use tcsync::version::{compare, sort_versions};
//! use std::cmp::Ordering;
//!
//! assert_eq!(compare("v1.2", "1.10"), Ordering::Less);
//! let sorted = sort_versions(vec!["v10", "v9", "junk"], false);
//! assert_eq!(sorted, vec!["junk", "v9", "v10"]);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

use crate::types::DEFAULT_OWNER;

/// Separator between the version and the owner in a directory name.
pub const OWNER_SEPARATOR: char = '_';

static LEADING_NUMBERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static regex is valid")
});

static VERSION_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d").expect("static regex is valid"));

/// Coerce a loose version token to a semver version.
///
/// Returns `None` when the token holds no digits at all.
pub fn coerce(token: &str) -> Option<Version> {
    let caps = LEADING_NUMBERS.captures(token.trim())?;
    let part = |i: usize| -> Option<u64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    Some(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Total order over version tokens.
///
/// Coercible tokens compare numerically; an uncoercible token is lower than
/// any coercible one. Ties (including two uncoercible tokens) fall back to
/// the raw string so the order stays antisymmetric.
pub fn compare(a: &str, b: &str) -> Ordering {
    let by_version = match (coerce(a), coerce(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    by_version.then_with(|| a.cmp(b))
}

/// Sort version tokens ascending, or descending when `inverted`.
pub fn sort_versions<S: AsRef<str>>(mut list: Vec<S>, inverted: bool) -> Vec<S> {
    list.sort_by(|a, b| {
        let ord = compare(a.as_ref(), b.as_ref());
        if inverted {
            ord.reverse()
        } else {
            ord
        }
    });
    list
}

/// The latest element of a list produced by [`sort_versions`].
///
/// Last element for an ascending sort, first for an inverted one.
pub fn latest_of<S>(sorted: &[S], inverted: bool) -> Option<&S> {
    if inverted {
        sorted.first()
    } else {
        sorted.last()
    }
}

/// Strip the leading `v` (or any letter prefix) of a version string.
pub fn bare(version: &str) -> &str {
    version.trim_start_matches(|c: char| c.is_ascii_alphabetic())
}

/// Two version strings name the same release (`v0.14` == `0.14`).
pub fn same_version(a: &str, b: &str) -> bool {
    bare(a.trim()) == bare(b.trim())
}

// =============================================================================
// VERSIONED DIRECTORY NAMES
// =============================================================================

/// A directory name of the form `v<version>[_<owner>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedDirectory {
    /// Version without the leading `v`.
    pub version: String,
    /// Owner suffix, if the name carries one.
    pub owner: Option<String>,
}

impl VersionedDirectory {
    pub fn new(version: impl Into<String>, owner: Option<String>) -> Self {
        let version = version.into();
        Self {
            version: bare(&version).to_string(),
            owner,
        }
    }

    /// Parse a directory name. Returns `None` unless it matches `^v\d`.
    pub fn parse(name: &str) -> Option<Self> {
        if !VERSION_DIR.is_match(name) {
            return None;
        }
        let rest = &name[1..];
        let (version, owner) = match rest.split_once(OWNER_SEPARATOR) {
            Some((version, owner)) if !owner.is_empty() => (version, Some(owner.to_string())),
            Some((version, _)) => (version, None),
            None => (rest, None),
        };
        Some(Self {
            version: version.to_string(),
            owner,
        })
    }

    /// Render the directory name.
    pub fn format(&self) -> String {
        match &self.owner {
            Some(owner) => format!("v{}{}{}", self.version, OWNER_SEPARATOR, owner),
            None => format!("v{}", self.version),
        }
    }

    /// Owner with the default applied to suffix-less names.
    pub fn effective_owner(&self) -> &str {
        self.owner.as_deref().unwrap_or(DEFAULT_OWNER)
    }

    /// Whether this directory belongs to `owner`.
    pub fn belongs_to(&self, owner: &str) -> bool {
        self.effective_owner() == owner
    }
}

impl fmt::Display for VersionedDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// List the version directories directly under `path`.
///
/// A missing or unreadable directory yields an empty list.
pub fn versioned_dirs(path: &Path) -> Vec<(VersionedDirectory, PathBuf)> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            VersionedDirectory::parse(&name).map(|parsed| (parsed, entry.path()))
        })
        .collect();
    dirs.sort_by(|(a, _), (b, _)| {
        compare(&a.version, &b.version).then_with(|| a.format().cmp(&b.format()))
    });
    dirs
}

/// Path of the latest version directory under `path`.
///
/// When `owner` is given only that owner's directories count. If none match
/// and `fallback_to_default_owner` is set, the lookup is repeated once for
/// the default catalog owner.
pub fn get_latest_in_path(
    path: &Path,
    owner: Option<&str>,
    fallback_to_default_owner: bool,
) -> Option<PathBuf> {
    let candidates: Vec<_> = versioned_dirs(path)
        .into_iter()
        .filter(|(dir, _)| owner.map_or(true, |o| dir.belongs_to(o)))
        .collect();

    if let Some((_, latest)) = candidates.last() {
        return Some(latest.clone());
    }

    match owner {
        Some(o) if fallback_to_default_owner && o != DEFAULT_OWNER => {
            get_latest_in_path(path, Some(DEFAULT_OWNER), false)
        }
        _ => None,
    }
}

/// Find the directory holding exactly `version` for `owner` under `path`.
pub fn find_version_dir(
    path: &Path,
    version: &str,
    owner: &str,
    fallback_to_default_owner: bool,
) -> Option<PathBuf> {
    let dirs = versioned_dirs(path);
    let matching = |o: &str| {
        dirs.iter()
            .find(|(dir, _)| dir.belongs_to(o) && same_version(&dir.version, version))
            .map(|(_, p)| p.clone())
    };
    matching(owner).or_else(|| {
        if fallback_to_default_owner && owner != DEFAULT_OWNER {
            matching(DEFAULT_OWNER)
        } else {
            None
        }
    })
}
