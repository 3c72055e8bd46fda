// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Top-level synchronization.
//!
//! [`Synchronizer::synchronize`] scans the resource root, fetches the
//! catalog, plans, runs the plan and finally reconciles prerequisite
//! versions against every pin on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::download::{Orchestrator, OrchestratorSettings, ProgressEvent, RunReport, RunState};
use crate::error::{InstallError, Phase, Result, SyncError};
use crate::inventory;
use crate::planner::{self, CatalogSnapshot, DownloadPlanItem, OwnerFilter};
use crate::reconcile::reconcile_prerequisites;
use crate::transport::{CatalogSource, Transport};
use crate::types::{install_language, LocalResourceRecord};

/// Result of a synchronization: what was installed and what failed.
pub type SyncOutcome = RunReport;

/// Entry point tying catalog, planner and orchestrator together.
pub struct Synchronizer<C: CatalogSource> {
    catalog: C,
    orchestrator: Orchestrator,
    record_state: bool,
}

impl<C: CatalogSource> Synchronizer<C> {
    pub fn new<T: Transport + 'static>(root: impl Into<PathBuf>, catalog: C, transport: T) -> Self {
        Self {
            catalog,
            orchestrator: Orchestrator::new(root, Arc::new(transport)),
            record_state: true,
        }
    }

    /// Build from a loaded configuration.
    pub fn from_config<T: Transport + 'static>(config: &SyncConfig, catalog: C, transport: T) -> Self {
        Self::new(config.resource_root.clone(), catalog, transport)
            .with_settings(OrchestratorSettings::from(config))
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.orchestrator = self.orchestrator.with_settings(settings);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.orchestrator = self.orchestrator.with_progress(tx);
        self
    }

    /// Skip writing `last_run.json`.
    pub fn without_state(mut self) -> Self {
        self.record_state = false;
        self
    }

    pub fn root(&self) -> &Path {
        self.orchestrator.root()
    }

    /// Bring the given languages up to date.
    ///
    /// Returns [`SyncError::AllFailed`] when every planned item failed.
    pub async fn synchronize(
        &self,
        languages: &[String],
        owner_filter: Option<&OwnerFilter>,
    ) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let languages = normalize_languages(languages)?;
        let plan = self.plan(&languages, owner_filter).await?;
        if plan.is_empty() {
            tracing::info!("Everything is up to date");
            return Ok(SyncOutcome::default());
        }

        let concurrency = self.orchestrator.settings().concurrency;
        let mut result = self.orchestrator.run(plan, concurrency).await;

        if let Err(e) = reconcile_prerequisites(self.root()) {
            tracing::warn!("Prerequisite reconciliation failed: {}", e);
            record_reconcile_failure(&mut result, self.root(), &e);
        }

        if self.record_state {
            let report = match &result {
                Ok(report) => report.clone(),
                Err(SyncError::AllFailed { errors }) => RunReport {
                    installed: Vec::new(),
                    errors: errors.clone(),
                },
                Err(_) => RunReport::default(),
            };
            if let Err(e) = RunState::from_report(&languages, started_at, &report).save(self.root()) {
                tracing::warn!("Could not record run state: {}", e);
            }
        }

        result
    }

    /// Download everything new for `languages`, for every owner.
    pub async fn download_resources(&self, languages: &[String]) -> Result<SyncOutcome> {
        self.synchronize(languages, None).await
    }

    /// The plan a synchronization would run, without running it.
    pub async fn check_for_updates(
        &self,
        languages: &[String],
        owner_filter: Option<&OwnerFilter>,
    ) -> Result<Vec<DownloadPlanItem>> {
        let languages = normalize_languages(languages)?;
        self.plan(&languages, owner_filter).await
    }

    /// Installed resources, latest version per owner.
    pub fn local_resources(&self) -> Result<Vec<LocalResourceRecord>> {
        inventory::scan(self.root())
    }

    async fn plan(
        &self,
        languages: &[String],
        owner_filter: Option<&OwnerFilter>,
    ) -> Result<Vec<DownloadPlanItem>> {
        let local: Vec<LocalResourceRecord> = inventory::scan(self.root())?
            .into_iter()
            .filter(|r| languages.contains(&r.language_id))
            .collect();

        let snapshot = CatalogSnapshot::new(self.catalog.fetch_catalog().await?).for_languages(languages);
        tracing::debug!(
            "Catalog snapshot at {} has {} resources for {:?}",
            snapshot.fetched_at(),
            snapshot.len(),
            languages
        );
        Ok(planner::plan(&local, &snapshot, owner_filter))
    }
}

/// Report a failed batch reconciliation as a `Prune` error of the run.
fn record_reconcile_failure(result: &mut Result<SyncOutcome>, root: &Path, err: &SyncError) {
    let failure = InstallError::new(root.display().to_string(), Phase::Prune, err);
    match result {
        Ok(outcome) => outcome.errors.push(failure),
        Err(SyncError::AllFailed { errors }) => errors.push(failure),
        Err(_) => {}
    }
}

fn normalize_languages(languages: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = languages
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| install_language(l).to_string())
        .collect();
    normalized.sort();
    normalized.dedup();
    if normalized.is_empty() {
        return Err(SyncError::EmptyLanguageList);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_languages() {
        let langs = vec![" en ".to_string(), "el-x-koine".to_string(), "en".to_string()];
        assert_eq!(normalize_languages(&langs).unwrap(), vec!["en", "grc"]);
        assert!(matches!(
            normalize_languages(&["  ".to_string()]),
            Err(SyncError::EmptyLanguageList)
        ));
    }

    #[test]
    fn test_reconcile_failure_is_reported() {
        let root = Path::new("/res");
        let err = SyncError::io(
            "/res/grc/bibles/ugnt/v0.14_unfoldingWord",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );

        let mut result: Result<SyncOutcome> = Ok(SyncOutcome::default());
        record_reconcile_failure(&mut result, root, &err);
        let errors = result.unwrap().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].phase, Phase::Prune);
        assert_eq!(errors[0].resource, "/res");
        assert!(errors[0].message.contains("denied"));

        let mut all_failed: Result<SyncOutcome> = Err(SyncError::AllFailed { errors: Vec::new() });
        record_reconcile_failure(&mut all_failed, root, &err);
        match all_failed {
            Err(SyncError::AllFailed { errors }) => assert_eq!(errors[0].phase, Phase::Prune),
            other => panic!("unexpected: {:?}", other.map(|o| o.installed)),
        }
    }
}
