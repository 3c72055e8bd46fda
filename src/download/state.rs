// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Record of the last synchronization run.
//!
//! Saved under `<root>/.tcsync/last_run.json` so `tcsync status` can show
//! what failed last time. Writers take an exclusive lock on a sibling
//! `.lock` file and replace the state file by rename; readers take a shared
//! lock. Several processes may share one resource root.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::types::RunReport;
use crate::error::{InstallError, Result, SyncError};

/// Default timeout for acquiring the state lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval while waiting for the lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Directory under the resource root holding tcsync's own files.
pub const STATE_DIR: &str = ".tcsync";

/// Summary of one run, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Format version for future migrations.
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub languages: Vec<String>,
    /// Identities of installed resources.
    pub installed: Vec<String>,
    pub errors: Vec<InstallError>,
}

impl RunState {
    pub fn from_report(
        languages: &[String],
        started_at: DateTime<Utc>,
        report: &RunReport,
    ) -> Self {
        Self {
            version: 1,
            started_at,
            finished_at: Utc::now(),
            languages: languages.to_vec(),
            installed: report.installed.iter().map(|d| d.identity()).collect(),
            errors: report.errors.clone(),
        }
    }

    pub fn state_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join("last_run.json")
    }

    fn lock_path(root: &Path) -> PathBuf {
        Self::state_path(root).with_extension("lock")
    }

    /// Load the last run, or `None` if there has been none.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = Self::state_path(root);
        if !path.exists() {
            return Ok(None);
        }

        let lock_path = Self::lock_path(root);
        let lock_file = open_lock_file(&lock_path)?;
        acquire(&lock_path, LOCK_TIMEOUT, || FileExt::try_lock_shared(&lock_file))?;

        let content = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        let state = serde_json::from_str(&content).map_err(|e| SyncError::json(&path, e))?;
        Ok(Some(state))
    }

    /// Save atomically under an exclusive lock.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::state_path(root);
        let lock_path = Self::lock_path(root);
        let lock_file = open_lock_file(&lock_path)?;
        acquire(&lock_path, LOCK_TIMEOUT, || FileExt::try_lock_exclusive(&lock_file))?;

        let content = serde_json::to_string_pretty(self).map_err(|e| SyncError::json(&path, e))?;
        let temp_path = path.with_extension("json.tmp");
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
        fs::rename(&temp_path, &path).map_err(|e| SyncError::io(&path, e))?;

        // Lock is released when lock_file is dropped.
        Ok(())
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SyncError::io(path, e))
}

/// Retry a non-blocking lock attempt until it succeeds or `timeout` passes.
fn acquire<F>(path: &Path, timeout: Duration, mut try_lock: F) -> Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let start = Instant::now();
    loop {
        match try_lock() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    return Err(SyncError::io(
                        path,
                        io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out after {:?}; another tcsync may be running", timeout),
                        ),
                    ));
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => return Err(SyncError::io(path, e)),
        }
    }
}
