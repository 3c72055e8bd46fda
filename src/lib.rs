// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! tcsync - translation resource synchronization library
//!
//! Keeps a local tree of translation resources (Bible texts, translation
//! helps, checking data) in step with a remote catalog.
//!
//! **Scan** -> **Plan** -> **Download / Extract / Process** -> **Reconcile**
//!
//! # Core Modules
//!
//! - [`version`] - Version coercion, ordering and `v<ver>_<owner>` directory names
//! - [`inventory`] - Scanning the installed resource tree and its manifests
//! - [`planner`] - Deciding which catalog resources are newer than what is installed
//! - [`download`] - Bounded-concurrency plan execution with per-item isolation
//! - [`deps`] - Version pins from dependent packages on original-language Bibles
//! - [`reconcile`] - Pruning superseded versions while keeping pinned ones
//! - [`sync`] - The [`Synchronizer`] entry point
//! - [`transport`] / [`archive`] / [`processor`] - Network, zip and format seams
//! - [`config`] - Persistent configuration
//! - [`error`] - Typed errors and CLI error formatting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tcsync::{HttpCatalog, HttpTransport, SyncConfig, Synchronizer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SyncConfig::load()?;
//! let catalog = HttpCatalog::new(&config.catalog_url, Duration::from_secs(30))?;
//! let sync = Synchronizer::from_config(&config, catalog, HttpTransport::new()?);
//!
//! let outcome = sync.download_resources(&["en".to_string(), "grc".to_string()]).await?;
//! println!("{} installed, {} failed", outcome.installed.len(), outcome.errors.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod deps;
pub mod download;
pub mod error;
pub mod inventory;
pub mod locks;
pub mod planner;
pub mod processor;
pub mod reconcile;
pub mod sync;
pub mod transport;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use types::{LocalResourceRecord, ResourceDescriptor, ResourceKey, ResourceKind};

// Re-export the pipeline entry points
pub use config::SyncConfig;
pub use download::{Orchestrator, RunReport, RunState};
pub use planner::{plan, priority_class, CatalogSnapshot, DownloadPlanItem, OwnerFilter, PriorityClass};
pub use sync::{SyncOutcome, Synchronizer};

// Re-export seams
pub use archive::{ArchiveExtractor, ZipExtractor};
pub use processor::{FormatProcessor, ProcessRequest, ProcessorRegistry};
pub use transport::{CatalogSource, HttpCatalog, HttpTransport, Transport};

// Re-export error utilities
pub use error::{describe, format_error, InstallError, Phase, SyncError, TransportError};
