//! Records returned by the provisioning API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::ResourceKind;

/// A resource as reported by a describe, create or update call.
///
/// Only the fields the engine projects are typed. Everything else travels in
/// `attributes` for the caller's flatten layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResource {
    pub kind: ResourceKind,
    pub id: String,
    /// Raw lifecycle status string.
    pub lifecycle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub administrative_actions: Vec<AdministrativeAction>,
    #[serde(default)]
    pub attributes: Value,
}

impl RemoteResource {
    pub fn new(kind: ResourceKind, id: impl Into<String>, lifecycle: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            lifecycle: lifecycle.into(),
            failure_detail: None,
            administrative_actions: Vec::new(),
            attributes: Value::Null,
        }
    }

    pub fn with_failure_detail(mut self, detail: impl Into<String>) -> Self {
        self.failure_detail = Some(detail.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// The most recent administrative action of the given type, if listed.
    pub fn administrative_action(&self, action_type: &str) -> Option<&AdministrativeAction> {
        self.administrative_actions
            .iter()
            .rev()
            .find(|a| a.action_type == action_type)
    }
}

/// A long-running operation the remote system runs against a resource,
/// e.g. `FILE_SYSTEM_UPDATE` or `STORAGE_OPTIMIZATION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdministrativeAction {
    pub action_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

impl AdministrativeAction {
    pub fn new(action_type: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            status: status.into(),
            failure_detail: None,
        }
    }
}

/// One page of a describe call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RemoteResource>,
    pub next_token: Option<String>,
}

impl Page {
    pub fn last(items: Vec<RemoteResource>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    pub fn more(items: Vec<RemoteResource>, next_token: impl Into<String>) -> Self {
        Self {
            items,
            next_token: Some(next_token.into()),
        }
    }
}
