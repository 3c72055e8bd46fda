// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Archive extraction.
//!
//! Repository archives unpack into a single top-level folder
//! (`en_tn/`, `el-x-koine_ugnt-v0.14/`, ...). [`find_content_root`] locates
//! that folder so processors see the package contents directly.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Unpacks an archive file into a directory.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `dest`, returning the number of files written.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ArchiveError>;
}

/// Zip extractor backed by the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
        let file = File::open(archive).map_err(|e| ArchiveError::Io {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Open {
            path: archive.to_path_buf(),
            message: e.to_string(),
        })?;

        fs::create_dir_all(dest).map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        let mut written = 0;
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|e| ArchiveError::Entry {
                path: archive.to_path_buf(),
                index,
                message: e.to_string(),
            })?;

            let Some(relative) = entry.enclosed_name() else {
                return Err(ArchiveError::UnsafePath {
                    name: entry.name().to_string(),
                });
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ArchiveError::Io {
                    path: target.clone(),
                    source: e,
                })?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ArchiveError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let mut out = File::create(&target).map_err(|e| ArchiveError::Io {
                path: target.clone(),
                source: e,
            })?;
            io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::Io {
                path: target.clone(),
                source: e,
            })?;
            written += 1;
        }

        tracing::debug!("Extracted {} files from {:?}", written, archive);
        Ok(written)
    }
}

/// The single meaningful directory of an extracted archive.
///
/// Hidden entries (and macOS `__MACOSX` folders) are ignored. When exactly
/// one directory and no files remain, that directory is the content root;
/// otherwise `dir` itself is.
pub fn find_content_root(dir: &Path) -> io::Result<PathBuf> {
    let mut dirs = Vec::new();
    let mut has_files = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "__MACOSX" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            has_files = true;
        }
    }

    if dirs.len() == 1 && !has_files {
        Ok(dirs.remove(0))
    } else {
        Ok(dir.to_path_buf())
    }
}
