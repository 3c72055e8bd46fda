// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Plan execution.
//!
//! The [`Orchestrator`] installs plan items with a bounded number in flight.
//! Every item runs the same pipeline and either yields its installed path
//! or an [`InstallError`] tagged with the phase that failed. One item's
//! failure never stops the others.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};

use super::types::{
    OrchestratorSettings, ProgressEvent, RunReport, StagingDir, MAX_DEPENDENCY_DEPTH, STAGING_DIR,
};
use crate::archive::{find_content_root, ArchiveExtractor, ZipExtractor};
use crate::deps::{pinned_versions, pins_for, DependencyPin, ResolvedPin};
use crate::error::{InstallError, Phase, Result, SyncError};
use crate::inventory::manifest::{read_staged_manifest, write_manifest, InstalledManifest};
use crate::locks::resilient_write;
use crate::planner::DownloadPlanItem;
use crate::processor::{ProcessRequest, ProcessorRegistry};
use crate::reconcile::prune;
use crate::transport::Transport;
use crate::types::ResourceDescriptor;
use crate::version::VersionedDirectory;

type ItemResult = std::result::Result<PathBuf, InstallError>;

/// An installed item, plus a prune failure that happened after the move.
struct Installed {
    path: PathBuf,
    prune_error: Option<InstallError>,
}

type InstalledResult = std::result::Result<Installed, InstallError>;

/// Executes download plans against a resource root.
pub struct Orchestrator {
    root: PathBuf,
    transport: Arc<dyn Transport>,
    extractor: Arc<dyn ArchiveExtractor>,
    processors: Arc<ProcessorRegistry>,
    settings: OrchestratorSettings,
    /// One async lock per resource release being installed.
    in_flight: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Orchestrator {
    /// Orchestrator with zip extraction and the default processors.
    pub fn new(root: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            root: root.into(),
            transport,
            extractor: Arc::new(ZipExtractor),
            processors: Arc::new(ProcessorRegistry::with_defaults()),
            settings: OrchestratorSettings::default(),
            in_flight: RwLock::new(HashMap::new()),
            progress: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_processors(mut self, processors: ProcessorRegistry) -> Self {
        self.processors = Arc::new(processors);
        self
    }

    /// Send [`ProgressEvent`]s to `tx` while running.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Install every plan item, at most `concurrency` at a time.
    ///
    /// Fails with [`SyncError::AllFailed`] only when nothing was installed
    /// and at least one item failed. Otherwise the report lists installed
    /// descriptors and failures, both in plan order. An item whose new
    /// version is in place but whose older versions could not be pruned is
    /// listed as installed, with its `Prune` failure in `errors`.
    pub async fn run(&self, plan: Vec<DownloadPlanItem>, concurrency: usize) -> Result<RunReport> {
        let concurrency = concurrency.max(1);
        tracing::info!("Installing {} resources ({} at a time)", plan.len(), concurrency);

        let mut results: Vec<(usize, ResourceDescriptor, InstalledResult)> =
            stream::iter(plan.into_iter().enumerate())
                .map(|(index, item)| async move {
                    let result = self.install_item(&item.descriptor).await;
                    (index, item.descriptor, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _, _)| *index);

        let report = collect_report(results.into_iter().map(|(_, d, r)| (d, r)));

        tracing::info!(
            "Run finished: {} installed, {} failed",
            report.installed.len(),
            report.errors.len()
        );
        if report.installed.is_empty() && !report.errors.is_empty() {
            return Err(SyncError::AllFailed { errors: report.errors });
        }
        Ok(report)
    }

    /// Install a single descriptor.
    ///
    /// A failure to prune older versions after the move is logged; the new
    /// version stays installed.
    pub async fn install(&self, descriptor: &ResourceDescriptor) -> ItemResult {
        self.install_item(descriptor).await.map(|installed| installed.path)
    }

    async fn install_item(&self, descriptor: &ResourceDescriptor) -> InstalledResult {
        let lock = self.key_lock(&descriptor.identity());
        let _guard = lock.lock().await;
        self.notify(ProgressEvent::Started {
            resource: descriptor.identity(),
        });

        let result = self.install_locked(descriptor, 0).await;
        match &result {
            Ok(installed) => {
                if let Some(e) = &installed.prune_error {
                    tracing::warn!("{}", e);
                }
                self.notify(ProgressEvent::Installed {
                    resource: descriptor.identity(),
                    path: installed.path.clone(),
                })
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.notify(ProgressEvent::Failed(e.clone()));
            }
        }
        result
    }

    /// Final directory of a descriptor: `<resource dir>/v<version>_<owner>`.
    pub fn install_dir(&self, descriptor: &ResourceDescriptor) -> PathBuf {
        let name = VersionedDirectory::new(&descriptor.version, Some(descriptor.owner.clone()));
        descriptor.resource_dir(&self.root).join(name.format())
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = resilient_write(&self.in_flight);
        in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    /// The per-item pipeline. The caller holds the item's key lock.
    fn install_locked<'a>(
        &'a self,
        descriptor: &'a ResourceDescriptor,
        depth: u8,
    ) -> BoxFuture<'a, InstalledResult> {
        async move {
            let resource = descriptor.identity();
            descriptor
                .validate()
                .map_err(|e| InstallError::new(&resource, Phase::Validate, e))?;
            tracing::debug!("Installing {} (depth {})", resource, depth);

            let staging = StagingDir::create(
                self.root.join(STAGING_DIR).join(descriptor.staging_name()),
            )
            .map_err(|e| InstallError::new(&resource, Phase::Download, e))?;

            // Download
            let archive = staging.join("archive.zip");
            let outcome = self
                .transport
                .download(&descriptor.download_url, &archive)
                .await
                .map_err(|e| InstallError::new(&resource, Phase::Download, e))?;
            tracing::debug!("{}: downloaded {} bytes", resource, outcome.bytes);

            // Extract
            let import = staging.join("import");
            let extractor = self.extractor.clone();
            let content_root = tokio::task::spawn_blocking(move || -> std::result::Result<PathBuf, String> {
                extractor.extract(&archive, &import).map_err(|e| e.to_string())?;
                find_content_root(&import).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| InstallError::new(&resource, Phase::Extract, e))?
            .map_err(|e| InstallError::new(&resource, Phase::Extract, e))?;

            // Resolve
            let manifest = read_staged_manifest(&content_root)
                .map_err(|e| InstallError::new(&resource, Phase::Resolve, e))?;
            // Only dependent kinds consume pinned prerequisites. A pin on the
            // release being installed would wait on its own key lock.
            let pins: Vec<DependencyPin> = if descriptor.kind().is_dependent() {
                pins_for(&manifest, &descriptor.owner)
                    .into_iter()
                    .filter(|pin| pin.fetch_key() != resource)
                    .collect()
            } else {
                Vec::new()
            };
            let resolved = self.resolve_pins(descriptor, &pins, depth).await?;

            // Process
            let request = ProcessRequest {
                descriptor: descriptor.clone(),
                source: content_root,
                output: staging.join("output"),
                resources_root: self.root.clone(),
                pins,
                resolved,
            };
            let processor = self.processors.for_descriptor(descriptor);
            tracing::debug!("{}: processing with {}", resource, processor.name());
            let output = tokio::task::spawn_blocking(move || processor.process(&request))
                .await
                .map_err(|e| InstallError::new(&resource, Phase::Process, e))?
                .map_err(|e| InstallError::new(&resource, Phase::Process, e))?;

            // Manifest, install, prune
            let target = self.install_dir(descriptor);
            let root = self.root.clone();
            let owned = descriptor.clone();
            let installed = target.clone();
            let prune_error = tokio::task::spawn_blocking(move || {
                finalize(&root, &owned, manifest, &output, &installed)
            })
            .await
            .map_err(|e| InstallError::new(&resource, Phase::Install, e))??;

            tracing::info!("Installed {} at {:?}", resource, target);
            drop(staging);
            Ok(Installed {
                path: target,
                prune_error,
            })
        }
        .boxed()
    }

    async fn resolve_pins(
        &self,
        dependent: &ResourceDescriptor,
        pins: &[DependencyPin],
        depth: u8,
    ) -> std::result::Result<Vec<ResolvedPin>, InstallError> {
        let mut resolved = Vec::with_capacity(pins.len());
        for pin in pins {
            let path = match pin.find_installed(&self.root) {
                Some(path) => path,
                None => self.fetch_prerequisite(dependent, pin, depth).await?,
            };
            resolved.push(ResolvedPin {
                pin: pin.clone(),
                path,
            });
        }
        Ok(resolved)
    }

    /// Install the release a pin names, once, no deeper than
    /// [`MAX_DEPENDENCY_DEPTH`].
    async fn fetch_prerequisite(
        &self,
        dependent: &ResourceDescriptor,
        pin: &DependencyPin,
        depth: u8,
    ) -> ItemResult {
        let resource = dependent.identity();
        if depth >= MAX_DEPENDENCY_DEPTH {
            let err = SyncError::DependencyDepthExceeded {
                resource: resource.clone(),
                prerequisite: pin.fetch_key(),
            };
            return Err(InstallError::new(&resource, Phase::Resolve, err));
        }

        let lock = self.key_lock(&pin.fetch_key());
        let _guard = lock.lock().await;
        // Another item may have fetched it while we waited.
        if let Some(path) = pin.find_installed(&self.root) {
            tracing::debug!("{}: {} already installed", resource, pin);
            return Ok(path);
        }

        tracing::info!("{} needs {}; fetching it first", resource, pin);
        self.notify(ProgressEvent::FetchingPrerequisite {
            resource: resource.clone(),
            prerequisite: pin.fetch_key(),
        });
        tokio::time::sleep(self.settings.prerequisite_delay).await;

        let descriptor = pin.descriptor(&self.settings.content_base_url);
        self.install_locked(&descriptor, depth + 1)
            .await
            .map(|installed| installed.path)
            .map_err(|e| {
                InstallError::new(&resource, Phase::Resolve, format!("prerequisite {} failed: {}", pin, e))
            })
    }
}

/// Fold item results into a report, keeping their order.
fn collect_report(results: impl IntoIterator<Item = (ResourceDescriptor, InstalledResult)>) -> RunReport {
    let mut report = RunReport::default();
    for (descriptor, result) in results {
        match result {
            Ok(installed) => {
                report.installed.push(descriptor);
                report.errors.extend(installed.prune_error);
            }
            Err(e) => report.errors.push(e),
        }
    }
    report
}

/// Stamp the manifest, move the output into place and prune older versions.
///
/// Returns the prune failure, if any, once the new version is in place.
fn finalize(
    root: &Path,
    descriptor: &ResourceDescriptor,
    mut manifest: InstalledManifest,
    output: &Path,
    target: &Path,
) -> std::result::Result<Option<InstallError>, InstallError> {
    let resource = descriptor.identity();

    let relations = manifest.relation_entries();
    manifest.stamp(descriptor, relations);
    write_manifest(output, &manifest).map_err(|e| InstallError::new(&resource, Phase::Manifest, e))?;

    move_into_place(output, target).map_err(|e| InstallError::new(&resource, Phase::Install, e))?;

    // Prerequisites are pruned once per batch, after all pins are known.
    if !descriptor.kind().is_prerequisite() {
        let keep = pinned_versions(root, &descriptor.language_id, &descriptor.resource_id, &descriptor.owner);
        if let Err(e) = prune(&descriptor.resource_dir(root), &keep, &descriptor.owner) {
            return Ok(Some(InstallError::new(&resource, Phase::Prune, e)));
        }
    }
    Ok(None)
}

/// Replace `target` with `output`. A failed move leaves no partial target.
fn move_into_place(output: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    if let Err(e) = fs::rename(output, target) {
        if target.exists() {
            let _ = fs::remove_dir_all(target);
        }
        return Err(e);
    }
    Ok(())
}
