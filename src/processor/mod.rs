// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Format processors.
//!
//! A processor turns an extracted package into the installed layout for its
//! resource kind. Processors are picked by catalog subject through a
//! [`ProcessorRegistry`]; subjects nobody registered fall back to the
//! resource kind, then to a plain copy.
//!
//! Processors are synchronous and run on the blocking pool.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::deps::{DependencyPin, ResolvedPin};
use crate::error::{Result, SyncError};
use crate::types::ResourceDescriptor;

/// Input for one processor run.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub descriptor: ResourceDescriptor,
    /// Content root of the extracted package.
    pub source: PathBuf,
    /// Empty directory to write into.
    pub output: PathBuf,
    /// Root of the installed resources.
    pub resources_root: PathBuf,
    /// Pins declared by the package.
    pub pins: Vec<DependencyPin>,
    /// Pins that were found or fetched.
    pub resolved: Vec<ResolvedPin>,
}

impl ProcessRequest {
    /// Reject requests with missing paths before doing any work.
    pub fn validate(&self) -> Result<()> {
        let resource = self.descriptor.identity();
        if self.source.as_os_str().is_empty() {
            return Err(SyncError::MissingPath { resource, what: "source" });
        }
        if self.output.as_os_str().is_empty() {
            return Err(SyncError::MissingPath { resource, what: "output" });
        }
        if self.resources_root.as_os_str().is_empty() {
            return Err(SyncError::MissingPath { resource, what: "resources root" });
        }
        if !self.source.is_dir() {
            return Err(SyncError::SourceNotFound {
                resource,
                path: self.source.clone(),
            });
        }
        Ok(())
    }
}

/// Converts a staged package into its installed form.
pub trait FormatProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write the package into `request.output` and return that path.
    fn process(&self, request: &ProcessRequest) -> Result<PathBuf>;
}

/// Copies everything.
#[derive(Debug, Default)]
pub struct CopyProcessor;

impl FormatProcessor for CopyProcessor {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn process(&self, request: &ProcessRequest) -> Result<PathBuf> {
        request.validate()?;
        let files = copy_dir_recursive(&request.source, &request.output, &|_| false)
            .map_err(|e| SyncError::io(&request.output, e))?;
        tracing::debug!("{}: copied {} files", request.descriptor, files);
        Ok(request.output.clone())
    }
}

/// Bible texts: book files and manifest, without repository clutter.
#[derive(Debug, Default)]
pub struct BibleProcessor;

impl FormatProcessor for BibleProcessor {
    fn name(&self) -> &'static str {
        "bible"
    }

    fn process(&self, request: &ProcessRequest) -> Result<PathBuf> {
        request.validate()?;
        let files = copy_dir_recursive(&request.source, &request.output, &|name| {
            name.starts_with(".git")
        })
        .map_err(|e| SyncError::io(&request.output, e))?;
        tracing::debug!("{}: copied {} bible files", request.descriptor, files);
        Ok(request.output.clone())
    }
}

/// Helps aligned to an original-language release.
///
/// Refuses to run unless every declared pin has been resolved.
#[derive(Debug, Default)]
pub struct PinnedHelpsProcessor;

impl FormatProcessor for PinnedHelpsProcessor {
    fn name(&self) -> &'static str {
        "pinned-helps"
    }

    fn process(&self, request: &ProcessRequest) -> Result<PathBuf> {
        request.validate()?;
        for pin in &request.pins {
            let resolved = request
                .resolved
                .iter()
                .any(|r| &r.pin == pin && r.path.is_dir());
            if !resolved {
                return Err(SyncError::UnresolvedDependency {
                    resource: request.descriptor.identity(),
                    prerequisite: pin.fetch_key(),
                });
            }
        }
        let files = copy_dir_recursive(&request.source, &request.output, &|name| {
            name.starts_with(".git")
        })
        .map_err(|e| SyncError::io(&request.output, e))?;
        tracing::debug!(
            "{}: copied {} files aligned to {} pins",
            request.descriptor,
            files,
            request.pins.len()
        );
        Ok(request.output.clone())
    }
}

/// Processors keyed by lower-cased catalog subject.
pub struct ProcessorRegistry {
    by_subject: HashMap<String, Arc<dyn FormatProcessor>>,
    bible: Arc<dyn FormatProcessor>,
    pinned: Arc<dyn FormatProcessor>,
    fallback: Arc<dyn FormatProcessor>,
}

impl ProcessorRegistry {
    /// Registry with the built-in processors.
    pub fn with_defaults() -> Self {
        let bible: Arc<dyn FormatProcessor> = Arc::new(BibleProcessor);
        let pinned: Arc<dyn FormatProcessor> = Arc::new(PinnedHelpsProcessor);
        let mut registry = Self {
            by_subject: HashMap::new(),
            bible: bible.clone(),
            pinned: pinned.clone(),
            fallback: Arc::new(CopyProcessor),
        };
        for subject in ["Bible", "Aligned Bible", "Greek New Testament", "Hebrew Old Testament"] {
            registry.register(subject, bible.clone());
        }
        for subject in [
            "TSV Translation Notes",
            "TSV Translation Words Links",
            "TSV Translation Questions",
        ] {
            registry.register(subject, pinned.clone());
        }
        registry
    }

    pub fn register(&mut self, subject: &str, processor: Arc<dyn FormatProcessor>) {
        self.by_subject.insert(subject.trim().to_ascii_lowercase(), processor);
    }

    /// Processor for a descriptor: by subject, then by kind, then copy.
    pub fn for_descriptor(&self, descriptor: &ResourceDescriptor) -> Arc<dyn FormatProcessor> {
        if let Some(p) = self.by_subject.get(&descriptor.subject.trim().to_ascii_lowercase()) {
            return p.clone();
        }
        let kind = descriptor.kind();
        if kind.is_bible() {
            self.bible.clone()
        } else if kind.is_dependent() {
            self.pinned.clone()
        } else {
            self.fallback.clone()
        }
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Recursively copy `src` into `dst`, skipping entries whose name matches
/// `skip`. Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path, skip: &dyn Fn(&str) -> bool) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if skip(&name) {
            continue;
        }
        let target = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target, skip)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
