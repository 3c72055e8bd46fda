// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Update planning.
//!
//! Compares the local inventory against an immutable [`CatalogSnapshot`] and
//! returns the ordered list of resources to download.
//!
//! # Ordering rule
//!
//! Items are stably sorted by `(priority_class, language, resource, owner)`.
//! [`priority_class`] puts the prerequisite kind (original-language Bibles)
//! first, then standalone resources, then resources that pin prerequisite
//! versions. Identical input always yields the identical plan.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{parse_timestamp, LocalResourceRecord, ResourceDescriptor, ResourceKey};
use crate::version;

/// Scheduling class of a plan item. Lower classes run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    /// Consumed by other kinds through a pinned version.
    Prerequisite = 0,
    /// Neither pinned nor pinning.
    Standalone = 1,
    /// Pins a prerequisite version.
    Dependent = 2,
}

/// Classify a descriptor for plan ordering.
pub fn priority_class(descriptor: &ResourceDescriptor) -> PriorityClass {
    let kind = descriptor.kind();
    if kind.is_prerequisite() {
        PriorityClass::Prerequisite
    } else if kind.is_dependent() {
        PriorityClass::Dependent
    } else {
        PriorityClass::Standalone
    }
}

/// One resource queued for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPlanItem {
    pub descriptor: ResourceDescriptor,
    pub priority: PriorityClass,
}

impl DownloadPlanItem {
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        let priority = priority_class(&descriptor);
        Self { descriptor, priority }
    }

    fn sort_key(&self) -> (PriorityClass, &str, &str, &str) {
        (
            self.priority,
            &self.descriptor.language_id,
            &self.descriptor.resource_id,
            &self.descriptor.owner,
        )
    }
}

/// Read-only view of the remote catalog taken at one point in time.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    descriptors: Arc<[ResourceDescriptor]>,
    fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn new(descriptors: Vec<ResourceDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// A new snapshot holding only the given languages.
    pub fn for_languages(&self, languages: &[String]) -> Self {
        Self {
            descriptors: self
                .descriptors
                .iter()
                .filter(|d| languages.iter().any(|l| l == &d.language_id))
                .cloned()
                .collect::<Vec<_>>()
                .into(),
            fetched_at: self.fetched_at,
        }
    }
}

/// Set of owners a plan may include.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerFilter {
    owners: BTreeSet<String>,
}

impl OwnerFilter {
    pub fn new<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, owner: &str) -> bool {
        self.owners.contains(owner)
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Whether the remote copy is newer than what is installed.
pub fn is_stale(remote: &ResourceDescriptor, local: Option<&LocalResourceRecord>) -> bool {
    let Some(local) = local else {
        return true;
    };
    let remote_time = parse_timestamp(&remote.remote_modified_time);
    let local_time = local.modified_time.as_deref().and_then(parse_timestamp);
    match (remote_time, local_time) {
        (Some(r), Some(l)) => r > l,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Compute the ordered download plan.
///
/// Each (language, resource, owner) key appears at most once. When the
/// catalog lists several versions of one key, only the greatest version is
/// planned (ties go to the later modified time), so such a catalog yields
/// fewer items than it has rows.
pub fn plan(
    local: &[LocalResourceRecord],
    catalog: &CatalogSnapshot,
    owner_filter: Option<&OwnerFilter>,
) -> Vec<DownloadPlanItem> {
    let local_by_key: HashMap<ResourceKey, &LocalResourceRecord> =
        local.iter().map(|r| (r.key(), r)).collect();

    // Collapse duplicate catalog rows to the newest one per key.
    let mut newest: HashMap<ResourceKey, &ResourceDescriptor> = HashMap::new();
    for descriptor in catalog.descriptors() {
        if let Some(filter) = owner_filter {
            if !filter.is_empty() && !filter.allows(&descriptor.owner) {
                continue;
            }
        }
        newest
            .entry(descriptor.key())
            .and_modify(|current| {
                if supersedes(descriptor, *current) {
                    *current = descriptor;
                }
            })
            .or_insert(descriptor);
    }

    let mut items: Vec<DownloadPlanItem> = newest
        .into_iter()
        .filter(|(key, descriptor)| is_stale(descriptor, local_by_key.get(key).copied()))
        .map(|(_, descriptor)| DownloadPlanItem::new(descriptor.clone()))
        .collect();

    items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    tracing::info!(
        "Planned {} of {} catalog resources ({} installed locally)",
        items.len(),
        catalog.len(),
        local.len()
    );
    items
}

fn supersedes(candidate: &ResourceDescriptor, current: &ResourceDescriptor) -> bool {
    version::compare(&candidate.version, &current.version)
        .then_with(|| {
            let c = parse_timestamp(&candidate.remote_modified_time);
            let d = parse_timestamp(&current.remote_modified_time);
            c.cmp(&d)
        })
        .is_gt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn remote(lang: &str, id: &str, owner: &str, modified: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(lang, id, owner, "1")
            .with_url(format!("https://example.org/{}_{}.zip", lang, id))
            .with_modified(modified)
    }

    fn local(lang: &str, id: &str, owner: &str, modified: Option<&str>) -> LocalResourceRecord {
        LocalResourceRecord {
            language_id: lang.into(),
            resource_id: id.into(),
            owner: owner.into(),
            version: "1".into(),
            modified_time: modified.map(str::to_string),
            path: PathBuf::from("/unused"),
        }
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            remote("en", "tn", "unfoldingWord", "2021-01-01T00:00:00Z").with_subject("TSV Translation Notes"),
            remote("en", "ult", "unfoldingWord", "2021-01-01T00:00:00Z").with_subject("Aligned Bible"),
            remote("grc", "ugnt", "unfoldingWord", "2021-01-01T00:00:00Z").with_subject("Greek New Testament"),
            remote("en", "tw", "unfoldingWord", "2021-01-01T00:00:00Z").with_subject("Translation Words"),
            remote("en", "ult", "STR", "2021-01-01T00:00:00Z").with_subject("Aligned Bible"),
        ])
    }

    #[test]
    fn test_empty_inventory_plans_every_descriptor_once() {
        let snapshot = catalog();
        let items = plan(&[], &snapshot, None);
        assert_eq!(items.len(), snapshot.len());
        let mut identities: Vec<_> = items.iter().map(|i| i.descriptor.identity()).collect();
        identities.dedup();
        assert_eq!(identities.len(), snapshot.len());
    }

    #[test]
    fn test_order_is_priority_then_language_then_resource() {
        let items = plan(&[], &catalog(), None);
        let order: Vec<_> = items
            .iter()
            .map(|i| format!("{}/{}@{}", i.descriptor.language_id, i.descriptor.resource_id, i.descriptor.owner))
            .collect();
        assert_eq!(
            order,
            vec![
                "grc/ugnt@unfoldingWord",
                "en/tw@unfoldingWord",
                "en/ult@STR",
                "en/ult@unfoldingWord",
                "en/tn@unfoldingWord",
            ]
        );
        assert_eq!(plan(&[], &catalog(), None), items);
    }

    #[test]
    fn test_equal_time_is_not_stale() {
        let records = vec![local("en", "ult", "unfoldingWord", Some("2021-01-01T00:00:00Z"))];
        let items = plan(&records, &catalog(), None);
        assert!(!items
            .iter()
            .any(|i| i.descriptor.resource_id == "ult" && i.descriptor.owner == "unfoldingWord"));
    }

    #[test]
    fn test_staleness_rules() {
        let r = remote("en", "ult", "unfoldingWord", "2021-01-02T00:00:00Z");
        assert!(is_stale(&r, None));
        assert!(is_stale(&r, Some(&local("en", "ult", "unfoldingWord", Some("2021-01-01T00:00:00Z")))));
        assert!(is_stale(&r, Some(&local("en", "ult", "unfoldingWord", None))));
        let unknown = remote("en", "ult", "unfoldingWord", crate::types::EPOCH_ZERO);
        assert!(!is_stale(&unknown, Some(&local("en", "ult", "unfoldingWord", None))));
    }

    #[test]
    fn test_owner_filter_excludes_other_owners() {
        let filter = OwnerFilter::new(["STR"]);
        let items = plan(&[], &catalog(), Some(&filter));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].descriptor.owner, "STR");
    }

    #[test]
    fn test_duplicate_rows_collapse_to_newest_version() {
        let snapshot = CatalogSnapshot::new(vec![
            ResourceDescriptor::new("en", "ult", "unfoldingWord", "v20").with_url("u"),
            ResourceDescriptor::new("en", "ult", "unfoldingWord", "v21").with_url("u"),
            ResourceDescriptor::new("en", "ult", "unfoldingWord", "v3").with_url("u"),
        ]);
        let items = plan(&[], &snapshot, None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].descriptor.version, "v21");
    }

    #[test]
    fn test_for_languages_keeps_only_requested() {
        let snapshot = catalog().for_languages(&["grc".to_string()]);
        assert_eq!(snapshot.len(), 1);
    }
}
