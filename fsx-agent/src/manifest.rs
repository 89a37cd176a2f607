//! Desired-state manifest.
//!
//! A manifest lists named resources with their kind, request body and
//! update groups. Bodies may reference other entries as `${name}`; the
//! reference resolves to that entry's remote id once it exists.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use fsx_engine::{EngineConfig, Mutation, ResourceKind, UpdateGroup, UpdatePlan};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid entry {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("entry {name} references unknown resource {reference}")]
    UnresolvedReference { name: String, reference: String },
}

impl ManifestError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ManifestError::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Whether an entry should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// One attribute group of an entry's update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    #[serde(default = "empty_object")]
    pub body: Value,
    #[serde(default = "default_true")]
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrative_action: Option<String>,
}

/// One desired resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    pub kind: ResourceKind,
    /// Remote id of a resource that already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "empty_object")]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_groups: Vec<GroupEntry>,
    #[serde(default)]
    pub state: Presence,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn default_true() -> bool {
    true
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check engine settings, names, kinds, bodies and references.
    pub fn validate(&self) -> Result<(), ManifestError> {
        self.engine
            .validate()
            .map_err(|e| ManifestError::invalid("engine", e.0))?;

        let mut names = HashSet::new();
        for entry in &self.resources {
            if entry.name.is_empty() {
                return Err(ManifestError::invalid("<unnamed>", "name must not be empty"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ManifestError::invalid(&entry.name, "duplicate name"));
            }
            if entry.kind == ResourceKind::AdministrativeAction {
                return Err(ManifestError::invalid(
                    &entry.name,
                    "administrative actions cannot be declared",
                ));
            }
            if !entry.body.is_object() {
                return Err(ManifestError::invalid(&entry.name, "body must be an object"));
            }
            for group in &entry.update_groups {
                if !group.body.is_object() {
                    return Err(ManifestError::invalid(
                        &entry.name,
                        format!("update group {} body must be an object", group.name),
                    ));
                }
            }
        }

        for entry in &self.resources {
            let mut refs = Vec::new();
            collect_references(&entry.body, &mut refs);
            for group in &entry.update_groups {
                collect_references(&group.body, &mut refs);
            }
            if let Some(unknown) = refs.into_iter().find(|r| !names.contains(r.as_str())) {
                return Err(ManifestError::UnresolvedReference {
                    name: entry.name.clone(),
                    reference: unknown,
                });
            }
        }
        Ok(())
    }
}

impl ResourceEntry {
    /// Creation request with `${name}` references resolved.
    pub fn create_mutation(
        &self,
        ids: &HashMap<String, String>,
        token: impl Into<fsx_engine::RequestToken>,
    ) -> Result<Mutation, ManifestError> {
        Ok(Mutation::with_token(token, resolve(&self.name, &self.body, ids)?))
    }

    /// Update plan with `${name}` references resolved.
    pub fn update_plan(&self, ids: &HashMap<String, String>) -> Result<UpdatePlan, ManifestError> {
        self.update_groups
            .iter()
            .map(|g| -> Result<UpdateGroup, ManifestError> {
                let mut group = UpdateGroup::new(&g.name, resolve(&self.name, &g.body, ids)?);
                if !g.changed {
                    group = group.unchanged();
                }
                if let Some(action) = &g.administrative_action {
                    group = group.awaiting_action(action);
                }
                Ok(group)
            })
            .collect()
    }
}

/// `${name}` when the whole string is a reference.
fn reference(s: &str) -> Option<&str> {
    s.strip_prefix("${")?.strip_suffix('}')
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(r) = reference(s) {
                out.push(r.to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

fn resolve(
    name: &str,
    value: &Value,
    ids: &HashMap<String, String>,
) -> Result<Value, ManifestError> {
    Ok(match value {
        Value::String(s) => match reference(s) {
            Some(r) => match ids.get(r) {
                Some(id) => Value::String(id.clone()),
                None => {
                    return Err(ManifestError::UnresolvedReference {
                        name: name.to_string(),
                        reference: r.to_string(),
                    });
                }
            },
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve(name, v, ids))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve(name, v, ids)?)))
                .collect::<Result<_, ManifestError>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST: &str = r#"{
        "engine": { "poll_interval_ms": 1000 },
        "resources": [
            { "name": "fs", "kind": "ontap_file_system", "body": { "StorageCapacity": 1024 } },
            { "name": "svm", "kind": "storage_virtual_machine",
              "body": { "FileSystemId": "${fs}", "Name": "svm1" } },
            { "name": "vol", "kind": "ontap_volume",
              "body": { "StorageVirtualMachineId": "${svm}" },
              "update_groups": [
                  { "name": "size", "body": { "SizeInMegabytes": 2048 },
                    "administrative_action": "VOLUME_UPDATE" },
                  { "name": "tags", "changed": false }
              ] },
            { "name": "old", "kind": "backup", "id": "backup-0", "state": "absent" }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.resources.len(), 4);
        assert_eq!(manifest.engine.poll_interval_ms, 1000);
        assert_eq!(manifest.engine.not_found_checks, 20);
        assert_eq!(manifest.resources[3].state, Presence::Absent);
        assert_eq!(manifest.resources[1].state, Presence::Present);
    }

    #[test]
    fn test_references_resolve_to_ids() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let ids = HashMap::from([("fs".to_string(), "fs-0123".to_string())]);
        let mutation = manifest.resources[1].create_mutation(&ids, "tok").unwrap();
        assert_eq!(mutation.body, json!({"FileSystemId": "fs-0123", "Name": "svm1"}));
        assert_eq!(mutation.token.as_str(), "tok");

        let err = manifest.resources[2].create_mutation(&ids, "tok").unwrap_err();
        assert!(matches!(err, ManifestError::UnresolvedReference { ref reference, .. } if reference == "svm"));
    }

    #[test]
    fn test_update_plan_keeps_order_and_flags() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let plan = manifest.resources[2].update_plan(&HashMap::new()).unwrap();
        let names: Vec<_> = plan.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["size", "tags"]);
        assert_eq!(plan.changed().count(), 1);
        assert_eq!(
            plan.groups()[0].administrative_action.as_deref(),
            Some("VOLUME_UPDATE")
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Manifest::parse(
            r#"{"resources": [
                {"name": "a", "kind": "backup"},
                {"name": "a", "kind": "backup"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate name"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = Manifest::parse(
            r#"{"resources": [
                {"name": "dra", "kind": "data_repository_association",
                 "body": {"FileSystemId": "${missing}"}}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_non_object_body_rejected() {
        assert!(Manifest::parse(r#"{"resources": [{"name": "a", "kind": "file_cache", "body": 3}]}"#).is_err());
    }

    #[test]
    fn test_out_of_range_engine_settings_rejected() {
        let err = Manifest::parse(r#"{"engine": {"timeout_scale": 1e300}}"#).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { ref name, .. } if name == "engine"));

        let err = Manifest::parse(&format!(
            r#"{{"engine": {{"timeouts": {{"backup": {{"create_minutes": {}}}}}}}}}"#,
            u64::MAX
        ))
        .unwrap_err();
        assert!(err.to_string().contains("backup.create_minutes"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();
        assert_eq!(Manifest::load(&path).unwrap().resources.len(), 4);
        assert!(matches!(
            Manifest::load(dir.path().join("missing.json")),
            Err(ManifestError::Io { .. })
        ));
    }
}
