// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types and error formatting for tcsync.
//!
//! Library code returns the typed errors below. Per-item failures during a
//! synchronization run are captured as [`InstallError`] values so a single
//! broken package never aborts the rest of the plan.
//!
//! The formatting helpers at the bottom render actionable messages for the
//! command line (title, possible causes, suggested fixes).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error for synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A download was requested for an empty list of languages.
    #[error("language list is empty: nothing to download")]
    EmptyLanguageList,

    /// A descriptor is missing one of its identity fields.
    #[error("resource identity is incomplete ({resource}): missing {field}")]
    MissingIdentity { resource: String, field: &'static str },

    /// A required source or output path was not supplied.
    #[error("{resource}: missing {what} path")]
    MissingPath { resource: String, what: &'static str },

    /// A source path was supplied but does not exist.
    #[error("{resource}: source path does not exist: {path:?}")]
    SourceNotFound { resource: String, path: PathBuf },

    /// The remote catalog could not be fetched or decoded.
    #[error("catalog fetch failed: {0}")]
    Catalog(String),

    /// A prerequisite needed another prerequisite.
    #[error("{resource}: prerequisite {prerequisite} has unresolved prerequisites of its own")]
    DependencyDepthExceeded { resource: String, prerequisite: String },

    /// A pinned prerequisite is still missing after the fetch attempt.
    #[error("{resource}: pinned prerequisite {prerequisite} is not installed")]
    UnresolvedDependency { resource: String, prerequisite: String },

    /// Every item of a run failed.
    #[error("all {} resources failed to install", errors.len())]
    AllFailed { errors: Vec<InstallError> },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("YAML error in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Input errors are never retried and abort the item immediately.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyLanguageList
                | Self::MissingIdentity { .. }
                | Self::MissingPath { .. }
                | Self::SourceNotFound { .. }
        )
    }
}

/// Errors raised by the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request kept timing out until the retry bound was exhausted.
    #[error("download of {url} timed out after {attempts} attempts")]
    Timeout { url: String, attempts: u32 },

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection or protocol failure that is not a timeout.
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("I/O error writing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors raised while unpacking an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open archive {path:?}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("bad archive entry {index} in {path:?}: {message}")]
    Entry {
        path: PathBuf,
        index: usize,
        message: String,
    },

    #[error("archive entry escapes destination: {name}")]
    UnsafePath { name: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline step in which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Download,
    Extract,
    Resolve,
    Process,
    Manifest,
    Install,
    Prune,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Resolve => "resolve",
            Self::Process => "process",
            Self::Manifest => "manifest",
            Self::Install => "install",
            Self::Prune => "prune",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single item's failure: which resource, which phase, what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{resource}: {phase} failed: {message}")]
pub struct InstallError {
    /// Identity string of the failing resource.
    pub resource: String,
    /// Step that failed.
    pub phase: Phase,
    /// Underlying error message.
    pub message: String,
}

impl InstallError {
    pub fn new(resource: impl Into<String>, phase: Phase, err: impl fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            phase,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// CLI ERROR FORMATTING
// =============================================================================

/// Hint shown at the bottom of formatted errors.
pub const HELP_HINT: &str = "Run `tcsync --help` for usage.";

/// Formats an error message with title, causes, fixes, and a usage hint.
///
/// # Example
///
/// ```
/// use tcsync::error::format_error;
///
/// let error = format_error(
///     "Failed to fetch the resource catalog",
///     &["No network connection", "Catalog URL is wrong"],
///     &["Check connectivity", "Verify URL: tcsync config show"],
/// );
/// assert!(error.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n\n", title);

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(HELP_HINT);
    output
}

/// Render a [`SyncError`] with hints matching its kind.
pub fn describe(err: &SyncError) -> String {
    match err {
        SyncError::EmptyLanguageList => format_error(
            "No languages selected",
            &["The language list passed to sync was empty"],
            &["Pass one or more languages: tcsync sync --lang en --lang grc"],
        ),
        SyncError::Catalog(msg) => format_error(
            &format!("Failed to fetch the resource catalog: {}", msg),
            &["No network connection", "Catalog URL is wrong or the service is down"],
            &["Check connectivity and retry", "Verify URL: tcsync config show"],
        ),
        SyncError::AllFailed { errors } => {
            let causes: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            let causes: Vec<&str> = causes.iter().map(|s| s.as_str()).collect();
            format_error(
                "Every resource failed to install",
                &causes,
                &["Retry later: tcsync sync", "Inspect the last run: tcsync status"],
            )
        }
        other => format_error(&other.to_string(), &[], &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.ends_with(HELP_HINT));
        assert!(!error.contains("http"));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_install_error_display_carries_identity_and_phase() {
        let err = InstallError::new("en/tn@unfoldingWord v40", Phase::Extract, "bad zip");
        assert_eq!(err.to_string(), "en/tn@unfoldingWord v40: extract failed: bad zip");
    }

    #[test]
    fn test_input_error_classification() {
        assert!(SyncError::EmptyLanguageList.is_input_error());
        assert!(!SyncError::Catalog("down".into()).is_input_error());
    }

    #[test]
    fn test_only_timeouts_are_transient() {
        let timeout = TransportError::Timeout { url: "u".into(), attempts: 3 };
        let status = TransportError::Status { url: "u".into(), status: 404 };
        assert!(timeout.is_transient());
        assert!(!status.is_transient());
    }

    #[test]
    fn test_describe_all_failed_lists_each_failure() {
        let err = SyncError::AllFailed {
            errors: vec![InstallError::new("grc/ugnt@Door43-Catalog v1", Phase::Download, "404")],
        };
        let text = describe(&err);
        assert!(text.contains("grc/ugnt@Door43-Catalog v1: download failed: 404"));
    }
}
