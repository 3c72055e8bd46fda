// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end synchronization tests against in-memory archives.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use tcsync::download::{OrchestratorSettings, RunState, STAGING_DIR};
use tcsync::error::{Phase, TransportError};
use tcsync::transport::DownloadOutcome;
use tcsync::{
    CatalogSource, OwnerFilter, ResourceDescriptor, SyncError, Synchronizer, Transport,
};

const CONTENT_BASE: &str = "https://git.door43.org";

// =============================================================================
// MOCKS
// =============================================================================

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

#[derive(Clone, Default)]
struct MockTransport {
    archives: Arc<HashMap<String, Vec<u8>>>,
    requests: Arc<Mutex<Vec<String>>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new(archives: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            archives: Arc::new(archives.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Hold every download open for `latency` so calls overlap.
    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn requests_for(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| *r == url).count()
    }

    /// Most downloads that were running at the same time.
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.archives.get(url) {
            Some(bytes) => {
                tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
                tokio::fs::write(dest, bytes).await.unwrap();
                Ok(DownloadOutcome {
                    status: 200,
                    dest: dest.to_path_buf(),
                    bytes: bytes.len() as u64,
                })
            }
            None => Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

struct MockCatalog(Vec<ResourceDescriptor>);

#[async_trait]
impl CatalogSource for MockCatalog {
    async fn fetch_catalog(&self) -> tcsync::error::Result<Vec<ResourceDescriptor>> {
        Ok(self.0.clone())
    }
}

fn synchronizer(root: &Path, catalog: Vec<ResourceDescriptor>, transport: MockTransport) -> Synchronizer<MockCatalog> {
    Synchronizer::new(root, MockCatalog(catalog), transport).with_settings(OrchestratorSettings {
        concurrency: 2,
        content_base_url: CONTENT_BASE.to_string(),
        prerequisite_delay: Duration::ZERO,
    })
}

fn langs(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn bible(lang: &str, id: &str, owner: &str, version: &str, modified: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(lang, id, owner, version)
        .with_subject("Bible")
        .with_url(format!("http://mock/{}_{}_{}_{}.zip", lang, id, owner, version))
        .with_modified(modified)
}

fn bible_zip(repo: &str) -> Vec<u8> {
    let manifest = format!("{}/manifest.yaml", repo);
    let book = format!("{}/01-GEN.usfm", repo);
    let hidden = format!("{}/.gitea/config", repo);
    zip_bytes(&[
        (manifest.as_str(), "dublin_core:\n  version: '1'\n"),
        (book.as_str(), "\\id GEN"),
        (hidden.as_str(), "x"),
    ])
}

fn staging_is_empty(root: &Path) -> bool {
    let staging = root.join(STAGING_DIR);
    !staging.exists() || fs::read_dir(&staging).unwrap().next().is_none()
}

fn dir_names(path: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn test_single_original_language_bible_installs() {
    let temp = TempDir::new().unwrap();
    let descriptor = ResourceDescriptor::new("grc", "ugnt", "Door43-Catalog", "v1")
        .with_subject("Greek New Testament")
        .with_url("http://mock/ugnt.zip")
        .with_modified("2021-03-01T00:00:00Z");
    let transport = MockTransport::new(vec![("http://mock/ugnt.zip".into(), bible_zip("el-x-koine_ugnt"))]);

    let sync = synchronizer(temp.path(), vec![descriptor], transport.clone());
    let outcome = sync.synchronize(&langs(&["grc"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), 1);
    assert!(outcome.errors.is_empty());

    let installed = temp.path().join("grc/bibles/ugnt/v1_Door43-Catalog");
    assert!(installed.join("01-GEN.usfm").is_file());
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(installed.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["version"], "1");
    assert_eq!(manifest["catalog_modified_time"], "2021-03-01T00:00:00Z");

    assert!(staging_is_empty(temp.path()));
    assert_eq!(transport.requests(), vec!["http://mock/ugnt.zip"]);
}

#[tokio::test]
async fn test_empty_language_list_is_rejected() {
    let temp = TempDir::new().unwrap();
    let sync = synchronizer(temp.path(), Vec::new(), MockTransport::default());

    let err = sync.download_resources(&[]).await.unwrap_err();
    assert!(matches!(err, SyncError::EmptyLanguageList));
}

#[tokio::test]
async fn test_second_run_is_up_to_date() {
    let temp = TempDir::new().unwrap();
    let ult = bible("en", "ult", "unfoldingWord", "v5", "2022-01-01T00:00:00Z");
    let transport = MockTransport::new(vec![(ult.download_url.clone(), bible_zip("en_ult"))]);
    let sync = synchronizer(temp.path(), vec![ult], transport.clone());

    let first = sync.synchronize(&langs(&["en"]), None).await.unwrap();
    assert_eq!(first.installed.len(), 1);

    let plan = sync.check_for_updates(&langs(&["en"]), None).await.unwrap();
    assert!(plan.is_empty());
    let second = sync.synchronize(&langs(&["en"]), None).await.unwrap();
    assert!(second.installed.is_empty());
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_dependent_fetches_pinned_prerequisite_and_keeps_it() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    // Only a newer release of the prerequisite is installed.
    let existing = root.join("grc/bibles/ugnt/v3.0.0_unfoldingWord");
    fs::create_dir_all(&existing).unwrap();
    fs::write(
        existing.join("manifest.json"),
        r#"{"version":"3.0.0","catalog_modified_time":"2023-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let tn = ResourceDescriptor::new("en", "tn", "unfoldingWord", "v40")
        .with_subject("TSV Translation Notes")
        .with_url("http://mock/en_tn.zip")
        .with_modified("2023-02-01T00:00:00Z");
    let tn_zip = zip_bytes(&[
        (
            "en_tn/manifest.yaml",
            "dublin_core:\n  version: '40'\n  relation:\n    - en/ult\n    - el-x-koine/ugnt?v=2.1.9\n",
        ),
        ("en_tn/tn_MAT.tsv", "Reference\tID\tNote\n"),
    ]);
    let ugnt_url = format!("{}/unfoldingWord/el-x-koine_ugnt/archive/v2.1.9.zip", CONTENT_BASE);
    let transport = MockTransport::new(vec![
        ("http://mock/en_tn.zip".into(), tn_zip),
        (ugnt_url.clone(), bible_zip("el-x-koine_ugnt")),
    ]);

    let sync = synchronizer(root, vec![tn], transport.clone());
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), 1, "errors: {:?}", outcome.errors);
    assert_eq!(transport.requests(), vec!["http://mock/en_tn.zip".to_string(), ugnt_url]);

    let notes = root.join("en/translationHelps/translationNotes/v40_unfoldingWord");
    assert!(notes.join("tn_MAT.tsv").is_file());
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(notes.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["relations"][1], "el-x-koine/ugnt?v=2.1.9");

    // The pinned release survives reconciliation next to the newer one.
    assert_eq!(
        dir_names(&root.join("grc/bibles/ugnt")),
        vec!["v2.1.9_unfoldingWord", "v3.0.0_unfoldingWord"]
    );
    assert!(staging_is_empty(root));
}

#[tokio::test]
async fn test_prerequisite_pins_are_not_followed() {
    let temp = TempDir::new().unwrap();
    let tn = ResourceDescriptor::new("en", "tn", "unfoldingWord", "v40")
        .with_subject("TSV Translation Notes")
        .with_url("http://mock/en_tn.zip");
    let tn_zip = zip_bytes(&[(
        "en_tn/manifest.yaml",
        "dublin_core:\n  relation:\n    - el-x-koine/ugnt?v=0.14\n",
    )]);
    let ugnt_zip = zip_bytes(&[(
        "ugnt/manifest.yaml",
        "dublin_core:\n  relation:\n    - hbo/uhb?v=2.1.15\n",
    )]);
    let ugnt_url = format!("{}/unfoldingWord/el-x-koine_ugnt/archive/v0.14.zip", CONTENT_BASE);
    let transport = MockTransport::new(vec![
        ("http://mock/en_tn.zip".into(), tn_zip),
        (ugnt_url.clone(), ugnt_zip),
    ]);

    let sync = synchronizer(temp.path(), vec![tn], transport.clone());
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), 1, "errors: {:?}", outcome.errors);
    assert_eq!(transport.requests(), vec!["http://mock/en_tn.zip".to_string(), ugnt_url]);
    assert!(temp.path().join("grc/bibles/ugnt/v0.14_unfoldingWord").is_dir());
    assert!(!temp.path().join("hbo").exists());
    assert!(staging_is_empty(temp.path()));
}

#[tokio::test]
async fn test_bible_relations_do_not_fetch_prerequisites() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let installed_ugnt = root.join("grc/bibles/ugnt/v0.34_unfoldingWord");
    fs::create_dir_all(&installed_ugnt).unwrap();
    fs::write(installed_ugnt.join("manifest.json"), r#"{"version":"0.34"}"#).unwrap();

    let ult = bible("en", "ult", "unfoldingWord", "v40", "2023-01-01T00:00:00Z");
    let ult_zip = zip_bytes(&[
        (
            "en_ult/manifest.yaml",
            "dublin_core:\n  version: '40'\n  relation:\n    - el-x-koine/ugnt?v=0.30\n    - hbo/uhb?v=2.1.30\n",
        ),
        ("en_ult/41-MAT.usfm", "\\id MAT"),
    ]);
    // The pinned releases are served, so any fetch would show up in requests.
    let transport = MockTransport::new(vec![
        (ult.download_url.clone(), ult_zip),
        (format!("{}/unfoldingWord/el-x-koine_ugnt/archive/v0.30.zip", CONTENT_BASE), bible_zip("ugnt")),
        (format!("{}/unfoldingWord/hbo_uhb/archive/v2.1.30.zip", CONTENT_BASE), bible_zip("uhb")),
    ]);

    let sync = synchronizer(root, vec![ult.clone()], transport.clone());
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed, vec![ult.clone()]);
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    assert_eq!(transport.requests(), vec![ult.download_url]);
    assert!(root.join("en/bibles/ult/v40_unfoldingWord/41-MAT.usfm").is_file());
    assert_eq!(dir_names(&root.join("grc/bibles/ugnt")), vec!["v0.34_unfoldingWord"]);
    assert!(!root.join("hbo").exists());
}

#[tokio::test]
async fn test_release_pinning_itself_does_not_hang() {
    let temp = TempDir::new().unwrap();
    let ugnt = ResourceDescriptor::new("grc", "ugnt", "unfoldingWord", "v0.34")
        .with_subject("Greek New Testament")
        .with_url("http://mock/ugnt.zip");
    let ugnt_zip = zip_bytes(&[(
        "el-x-koine_ugnt/manifest.yaml",
        "dublin_core:\n  version: '0.34'\n  relation:\n    - el-x-koine/ugnt?v=0.34\n",
    )]);
    let transport = MockTransport::new(vec![("http://mock/ugnt.zip".into(), ugnt_zip)]);

    let sync = synchronizer(temp.path(), vec![ugnt], transport.clone());
    let outcome = tokio::time::timeout(Duration::from_secs(5), sync.synchronize(&langs(&["grc"]), None))
        .await
        .expect("synchronize finished")
        .unwrap();

    assert_eq!(outcome.installed.len(), 1);
    assert_eq!(transport.requests(), vec!["http://mock/ugnt.zip"]);
    assert!(temp.path().join("grc/bibles/ugnt/v0.34_unfoldingWord").is_dir());
}

#[tokio::test]
async fn test_concurrent_downloads_stay_within_window() {
    let temp = TempDir::new().unwrap();
    let ids = ["glt", "gst", "ult", "ust", "t4t"];
    let catalog: Vec<ResourceDescriptor> = ids
        .iter()
        .map(|id| bible("en", id, "unfoldingWord", "v1", "2022-01-01T00:00:00Z"))
        .collect();
    let archives = catalog
        .iter()
        .map(|d| (d.download_url.clone(), bible_zip(&format!("en_{}", d.resource_id))))
        .collect();
    let transport = MockTransport::new(archives).with_latency(Duration::from_millis(50));

    let sync = synchronizer(temp.path(), catalog, transport.clone());
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), ids.len());
    assert_eq!(transport.requests().len(), ids.len());
    assert!(transport.peak() <= 2, "peak {}", transport.peak());
    assert_eq!(transport.peak(), 2);
}

#[tokio::test]
async fn test_shared_missing_prerequisite_is_fetched_once() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let relation = "dublin_core:\n  relation:\n    - el-x-koine/ugnt?v=2.1.9\n";

    let tn = ResourceDescriptor::new("en", "tn", "unfoldingWord", "v40")
        .with_subject("TSV Translation Notes")
        .with_url("http://mock/en_tn.zip")
        .with_modified("2023-02-01T00:00:00Z");
    let twl = ResourceDescriptor::new("en", "twl", "unfoldingWord", "v12")
        .with_subject("TSV Translation Words Links")
        .with_url("http://mock/en_twl.zip")
        .with_modified("2023-02-01T00:00:00Z");
    let ugnt_url = format!("{}/unfoldingWord/el-x-koine_ugnt/archive/v2.1.9.zip", CONTENT_BASE);
    let transport = MockTransport::new(vec![
        ("http://mock/en_tn.zip".into(), zip_bytes(&[("en_tn/manifest.yaml", relation)])),
        ("http://mock/en_twl.zip".into(), zip_bytes(&[("en_twl/manifest.yaml", relation)])),
        (ugnt_url.clone(), bible_zip("el-x-koine_ugnt")),
    ])
    .with_latency(Duration::from_millis(20));

    let sync = synchronizer(root, vec![tn, twl], transport.clone());
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), 2, "errors: {:?}", outcome.errors);
    assert_eq!(transport.requests_for(&ugnt_url), 1);
    assert_eq!(transport.requests().len(), 3);
    assert!(root.join("en/translationHelps/translationNotes/v40_unfoldingWord").is_dir());
    assert!(root.join("en/translationHelps/translationWordsLinks/v12_unfoldingWord").is_dir());
    assert_eq!(dir_names(&root.join("grc/bibles/ugnt")), vec!["v2.1.9_unfoldingWord"]);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_rest() {
    let temp = TempDir::new().unwrap();
    let ult = bible("en", "ult", "unfoldingWord", "v5", "2022-01-01T00:00:00Z");
    let ust = bible("en", "ust", "unfoldingWord", "v5", "2022-01-01T00:00:00Z");
    let transport = MockTransport::new(vec![(ult.download_url.clone(), bible_zip("en_ult"))]);

    let sync = synchronizer(temp.path(), vec![ust, ult], transport);
    let outcome = sync.synchronize(&langs(&["en"]), None).await.unwrap();

    assert_eq!(outcome.installed.len(), 1);
    assert_eq!(outcome.installed[0].resource_id, "ult");
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].phase, Phase::Download);
    assert!(outcome.errors[0].resource.starts_with("en/ust@unfoldingWord"));
    assert!(staging_is_empty(temp.path()));

    let state = RunState::load(temp.path()).unwrap().unwrap();
    assert_eq!(state.installed.len(), 1);
    assert_eq!(state.errors, outcome.errors);
}

#[tokio::test]
async fn test_everything_failing_is_an_error() {
    let temp = TempDir::new().unwrap();
    let ult = bible("en", "ult", "unfoldingWord", "v5", "2022-01-01T00:00:00Z");
    let broken = MockTransport::new(vec![(ult.download_url.clone(), b"not a zip".to_vec())]);

    let sync = synchronizer(temp.path(), vec![ult], broken);
    match sync.synchronize(&langs(&["en"]), None).await {
        Err(SyncError::AllFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].phase, Phase::Extract);
        }
        other => panic!("unexpected: {:?}", other.map(|o| o.installed)),
    }
    assert!(!temp.path().join("en/bibles/ult").exists());
}

#[tokio::test]
async fn test_newer_release_replaces_older() {
    let temp = TempDir::new().unwrap();
    let v1 = bible("en", "ult", "unfoldingWord", "v1", "2021-01-01T00:00:00Z");
    let v2 = bible("en", "ult", "unfoldingWord", "v2", "2022-01-01T00:00:00Z");
    let transport = MockTransport::new(vec![
        (v1.download_url.clone(), bible_zip("en_ult")),
        (v2.download_url.clone(), bible_zip("en_ult")),
    ]);

    synchronizer(temp.path(), vec![v1], transport.clone())
        .synchronize(&langs(&["en"]), None)
        .await
        .unwrap();
    synchronizer(temp.path(), vec![v2], transport)
        .synchronize(&langs(&["en"]), None)
        .await
        .unwrap();

    assert_eq!(dir_names(&temp.path().join("en/bibles/ult")), vec!["v2_unfoldingWord"]);
}

#[tokio::test]
async fn test_owner_filter_limits_plan() {
    let temp = TempDir::new().unwrap();
    let uw = bible("en", "ult", "unfoldingWord", "v5", "2022-01-01T00:00:00Z");
    let other = bible("en", "ult", "STR", "v5", "2022-01-01T00:00:00Z");
    let transport = MockTransport::new(vec![
        (uw.download_url.clone(), bible_zip("en_ult")),
        (other.download_url.clone(), bible_zip("en_ult")),
    ]);

    let sync = synchronizer(temp.path(), vec![uw, other], transport);
    let filter = OwnerFilter::new(["STR"]);
    let outcome = sync.synchronize(&langs(&["en"]), Some(&filter)).await.unwrap();

    assert_eq!(outcome.installed.len(), 1);
    assert_eq!(dir_names(&temp.path().join("en/bibles/ult")), vec!["v5_STR"]);
}
