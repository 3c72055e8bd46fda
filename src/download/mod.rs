// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download orchestration for tcsync.
//!
//! This module installs the items of a download plan:
//! - Bounded concurrency (`buffer_unordered`), default two items at a time
//! - Per-item error isolation with the failing phase recorded
//! - On-demand fetch of pinned prerequisite releases
//! - A persisted record of the last run
//!
//! # Pipeline
//!
//! ```text
//! validate ─▶ download ─▶ extract ─▶ resolve pins ─▶ process
//!                                        │
//!                                        ▼ (missing pin)
//!                              install prerequisite (depth 1)
//!
//! process ─▶ manifest ─▶ install ─▶ prune (not for prerequisites)
//! ```
//!
//! Each item works inside `<root>/.staging/<item>`; the directory is removed
//! whether the item succeeds or not.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tcsync::download::Orchestrator;
//! use tcsync::transport::HttpTransport;
//!
//! # async fn example(plan: Vec<tcsync::planner::DownloadPlanItem>) -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::new("/data/resources", Arc::new(HttpTransport::new()?));
//! let report = orchestrator.run(plan, 2).await?;
//! println!("{} installed, {} failed", report.installed.len(), report.errors.len());
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod state;
pub mod types;

pub use manager::Orchestrator;
pub use state::RunState;
pub use types::{OrchestratorSettings, ProgressEvent, RunReport, StagingDir, STAGING_DIR};
