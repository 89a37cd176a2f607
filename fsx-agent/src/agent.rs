//! Manifest agent: reconciles every manifest entry in dependency order,
//! deletes entries marked absent and prunes entries that disappeared from
//! the manifest.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fsx_engine::{
    EngineConfig, Mutation, ProvisioningApi, ReadOutcome, Reconciler, RequestToken, ResourceKind,
    UpdateGroup, UpdatePlan, reconciler_for,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::manifest::{Manifest, Presence, ResourceEntry};

/// Position of a kind in the apply order. Lower ranks are created first and
/// deleted last.
pub fn apply_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::LustreFileSystem
        | ResourceKind::WindowsFileSystem
        | ResourceKind::OntapFileSystem
        | ResourceKind::OpenZfsFileSystem => 0,
        ResourceKind::StorageVirtualMachine => 1,
        ResourceKind::OntapVolume | ResourceKind::OpenZfsVolume => 2,
        ResourceKind::OpenZfsSnapshot | ResourceKind::Backup => 3,
        ResourceKind::DataRepositoryAssociation => 4,
        ResourceKind::FileCache => 5,
        ResourceKind::AdministrativeAction => u8::MAX,
    }
}

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "detail")]
pub enum Action {
    Created,
    Recreated,
    Updated,
    Unchanged,
    Deleted,
    Pruned,
    AlreadyAbsent,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceOutcome {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub action: Action,
}

/// Result of one manifest application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ResourceOutcome>,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.action, Action::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// A resource the agent created or was told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownResource {
    pub kind: ResourceKind,
    pub id: String,
}

/// Applies manifests against a provisioning API.
///
/// Remembers the ids of the resources it manages across applications, the
/// request token of every create that did not finish, so a retried create is
/// idempotent, and a fingerprint of every update group it applied, so an
/// unchanged group is not sent again.
pub struct ManifestAgent {
    reconcilers: BTreeMap<ResourceKind, Arc<dyn Reconciler>>,
    known: HashMap<String, KnownResource>,
    pending_tokens: HashMap<String, RequestToken>,
    applied_groups: HashMap<(String, String), u64>,
}

impl ManifestAgent {
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut reconcilers = BTreeMap::new();
        for kind in ResourceKind::RECONCILABLE {
            let reconciler = reconciler_for(kind, api.clone(), config, cancel.clone())
                .with_context(|| format!("Failed to build {} reconciler", kind))?;
            reconcilers.insert(kind, Arc::from(reconciler));
        }
        Ok(Self {
            reconcilers,
            known: HashMap::new(),
            pending_tokens: HashMap::new(),
            applied_groups: HashMap::new(),
        })
    }

    pub fn known(&self) -> &HashMap<String, KnownResource> {
        &self.known
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.known.get(name).map(|k| k.id.as_str())
    }

    fn reconciler(&self, kind: ResourceKind) -> Result<Arc<dyn Reconciler>> {
        self.reconcilers
            .get(&kind)
            .cloned()
            .with_context(|| format!("No reconciler for {}", kind))
    }

    /// Apply a manifest. Per-entry failures are collected, not fatal.
    pub async fn apply(&mut self, manifest: &Manifest) -> ApplyReport {
        let started_at = Utc::now();
        info!(resources = manifest.resources.len(), "Applying manifest");

        // Creates of entries that left the manifest will not be retried.
        self.pending_tokens.retain(|name, _| {
            manifest
                .resources
                .iter()
                .any(|e| &e.name == name && e.state == Presence::Present)
        });

        for entry in &manifest.resources {
            if let Some(id) = &entry.id {
                self.known.entry(entry.name.clone()).or_insert(KnownResource {
                    kind: entry.kind,
                    id: id.clone(),
                });
            }
        }

        let mut present: Vec<&ResourceEntry> = manifest
            .resources
            .iter()
            .filter(|e| e.state == Presence::Present)
            .collect();
        present.sort_by_key(|e| apply_rank(e.kind));

        // Entries marked absent, plus previously managed entries that left
        // the manifest. Removed in reverse dependency order.
        let mut removals: Vec<(String, ResourceKind, bool)> = manifest
            .resources
            .iter()
            .filter(|e| e.state == Presence::Absent)
            .map(|e| (e.name.clone(), e.kind, false))
            .chain(
                self.known
                    .iter()
                    .filter(|(name, _)| !manifest.resources.iter().any(|e| &e.name == *name))
                    .map(|(name, k)| (name.clone(), k.kind, true)),
            )
            .collect();
        removals.sort_by(|a, b| {
            apply_rank(b.1)
                .cmp(&apply_rank(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut outcomes = Vec::new();
        for entry in present {
            let outcome = match self.apply_present(entry).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(name = %entry.name, kind = %entry.kind, "Reconciliation failed: {:#}", e);
                    ResourceOutcome {
                        name: entry.name.clone(),
                        kind: entry.kind,
                        id: self.id_of(&entry.name).map(str::to_string),
                        status: None,
                        action: Action::Failed(format!("{:#}", e)),
                    }
                }
            };
            outcomes.push(outcome);
        }

        for (name, kind, prune) in removals {
            let outcome = match self.apply_absent(&name, kind, prune).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(name = %name, kind = %kind, "Deletion failed: {:#}", e);
                    ResourceOutcome {
                        id: self.id_of(&name).map(str::to_string),
                        name,
                        kind,
                        status: None,
                        action: Action::Failed(format!("{:#}", e)),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = ApplyReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            outcomes = report.outcomes.len(),
            failures = report.failures().count(),
            "Manifest applied"
        );
        report
    }

    /// Mark groups whose resolved body was already applied as unchanged.
    fn pending_changes(&self, name: &str, plan: UpdatePlan) -> UpdatePlan {
        plan.groups()
            .iter()
            .cloned()
            .map(|group| {
                let key = (name.to_string(), group.name.clone());
                if group.changed && self.applied_groups.get(&key) == Some(&fingerprint(&group)) {
                    group.unchanged()
                } else {
                    group
                }
            })
            .collect()
    }

    fn record_applied(&mut self, name: &str, plan: &UpdatePlan) {
        for group in plan.changed() {
            self.applied_groups
                .insert((name.to_string(), group.name.clone()), fingerprint(group));
        }
    }

    fn forget(&mut self, name: &str) {
        self.known.remove(name);
        self.pending_tokens.remove(name);
        self.applied_groups.retain(|(entry, _), _| entry != name);
    }

    fn ids(&self) -> HashMap<String, String> {
        self.known
            .iter()
            .map(|(name, k)| (name.clone(), k.id.clone()))
            .collect()
    }

    async fn apply_present(&mut self, entry: &ResourceEntry) -> Result<ResourceOutcome> {
        let reconciler = self.reconciler(entry.kind)?;
        let ids = self.ids();

        let mut drifted = false;
        if let Some(known) = self.known.get(&entry.name) {
            let id = known.id.clone();
            match reconciler
                .read(&id, true)
                .await
                .with_context(|| format!("Failed to read {} {}", entry.kind, id))?
            {
                ReadOutcome::Found(resource) => {
                    let plan = self.pending_changes(&entry.name, entry.update_plan(&ids)?);
                    if !plan.has_changes() {
                        return Ok(outcome(entry, &resource, Action::Unchanged));
                    }
                    let updated = reconciler
                        .update(&id, &plan)
                        .await
                        .with_context(|| format!("Failed to update {} {}", entry.kind, id))?;
                    self.record_applied(&entry.name, &plan);
                    info!(name = %entry.name, id = %id, "Updated");
                    return Ok(outcome(entry, &updated, Action::Updated));
                }
                ReadOutcome::Drifted { .. } => {
                    warn!(name = %entry.name, id = %id, "Resource drifted, recreating");
                    self.applied_groups.retain(|(name, _), _| name != &entry.name);
                    drifted = true;
                }
            }
        }

        let token = self
            .pending_tokens
            .entry(entry.name.clone())
            .or_insert_with(RequestToken::generate)
            .clone();
        let mutation = entry.create_mutation(&ids, token)?;
        let created = reconciler
            .create(&mutation)
            .await
            .with_context(|| format!("Failed to create {} {}", entry.kind, entry.name))?;

        self.pending_tokens.remove(&entry.name);
        self.known.insert(
            entry.name.clone(),
            KnownResource {
                kind: entry.kind,
                id: created.id.clone(),
            },
        );
        info!(name = %entry.name, id = %created.id, "Created");
        let action = if drifted {
            Action::Recreated
        } else {
            Action::Created
        };
        Ok(outcome(entry, &created, action))
    }

    async fn apply_absent(
        &mut self,
        name: &str,
        kind: ResourceKind,
        prune: bool,
    ) -> Result<ResourceOutcome> {
        let Some(known) = self.known.get(name).cloned() else {
            return Ok(ResourceOutcome {
                name: name.to_string(),
                kind,
                id: None,
                status: None,
                action: Action::AlreadyAbsent,
            });
        };

        self.reconciler(kind)?
            .delete(&known.id, &Mutation::new(Value::Null))
            .await
            .with_context(|| format!("Failed to delete {} {}", kind, known.id))?;
        self.forget(name);
        info!(name = %name, id = %known.id, prune, "Deleted");

        Ok(ResourceOutcome {
            name: name.to_string(),
            kind,
            id: Some(known.id),
            status: None,
            action: if prune { Action::Pruned } else { Action::Deleted },
        })
    }
}

/// Identifies what a group sends: its resolved body and awaited action.
fn fingerprint(group: &UpdateGroup) -> u64 {
    let mut hasher = DefaultHasher::new();
    group.mutation.body.to_string().hash(&mut hasher);
    group.administrative_action.hash(&mut hasher);
    hasher.finish()
}

fn outcome(
    entry: &ResourceEntry,
    resource: &fsx_engine::RemoteResource,
    action: Action,
) -> ResourceOutcome {
    ResourceOutcome {
        name: entry.name.clone(),
        kind: entry.kind,
        id: Some(resource.id.clone()),
        status: Some(resource.lifecycle.clone()),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{InjectedFailure, SimOptions, SimulatedApi};
    use fsx_engine::Operation;
    use serde_json::json;

    #[test]
    fn test_apply_rank_orders_dependencies() {
        let mut kinds = vec![
            ResourceKind::FileCache,
            ResourceKind::OntapVolume,
            ResourceKind::DataRepositoryAssociation,
            ResourceKind::Backup,
            ResourceKind::StorageVirtualMachine,
            ResourceKind::OntapFileSystem,
        ];
        kinds.sort_by_key(|k| apply_rank(*k));
        assert_eq!(
            kinds,
            vec![
                ResourceKind::OntapFileSystem,
                ResourceKind::StorageVirtualMachine,
                ResourceKind::OntapVolume,
                ResourceKind::Backup,
                ResourceKind::DataRepositoryAssociation,
                ResourceKind::FileCache,
            ]
        );
    }

    #[test]
    fn test_report_serializes_failure_detail() {
        let report = ApplyReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![ResourceOutcome {
                name: "cache".to_string(),
                kind: ResourceKind::FileCache,
                id: None,
                status: None,
                action: Action::Failed("boom".to_string()),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["action"], "failed");
        assert_eq!(json["outcomes"][0]["detail"], "boom");
        assert!(!report.is_success());
    }

    #[test]
    fn test_fingerprint_follows_body_and_action() {
        let group = UpdateGroup::new("size", json!({"SizeInMegabytes": 2048}));
        let same = UpdateGroup::new("size", json!({"SizeInMegabytes": 2048}));
        assert_eq!(fingerprint(&group), fingerprint(&same));
        assert_ne!(
            fingerprint(&group),
            fingerprint(&UpdateGroup::new("size", json!({"SizeInMegabytes": 4096})))
        );
        assert_ne!(
            fingerprint(&group),
            fingerprint(&same.awaiting_action("VOLUME_UPDATE"))
        );
    }

    #[tokio::test]
    async fn test_tokens_of_removed_entries_are_dropped() {
        let api = Arc::new(SimulatedApi::default());
        let mut agent =
            ManifestAgent::new(api.clone(), &EngineConfig::default(), CancellationToken::new())
                .unwrap();
        api.fail_next(
            ResourceKind::FileCache,
            Operation::Create,
            InjectedFailure::service("InternalServerError", "try again"),
        )
        .await;

        let with_cache =
            Manifest::parse(r#"{"resources": [{"name": "cache", "kind": "file_cache"}]}"#).unwrap();
        let report = agent.apply(&with_cache).await;
        assert!(!report.is_success());
        assert!(agent.pending_tokens.contains_key("cache"));

        let report = agent.apply(&Manifest::parse(r#"{"resources": []}"#).unwrap()).await;
        assert!(report.outcomes.is_empty());
        assert!(agent.pending_tokens.is_empty());
    }
}
