//! In-memory provisioning API.
//!
//! Records behave like the remote service: every mutation returns a
//! transitional status, and the record settles after a configurable number
//! of describe calls. Failures, status scripts and out-of-band changes can be
//! injected for testing.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use fsx_engine::kind::Family;
use fsx_engine::{
    AdministrativeAction, ApiError, DescribeQuery, Mutation, Operation, Page, ProvisioningApi,
    RemoteResource, ResourceKind,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Error injected into the next call of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Service { code: String, message: String },
    Transport(String),
}

impl InjectedFailure {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        InjectedFailure::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    fn to_api_error(&self) -> ApiError {
        match self {
            InjectedFailure::Service { code, message } => ApiError::service(code, message),
            InjectedFailure::Transport(message) => ApiError::transport(message.clone()),
        }
    }
}

/// Behaviour knobs of the simulated service.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Describe calls that still report the transitional status.
    pub settle_after: u32,
    /// Records per describe page.
    pub page_size: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            settle_after: 2,
            page_size: 50,
        }
    }
}

/// What happens when a record's countdown reaches zero.
#[derive(Debug, Clone, PartialEq)]
enum Settle {
    To(String),
    Fail { status: String, detail: String },
    Remove,
}

#[derive(Debug, Clone)]
struct SimRecord {
    resource: RemoteResource,
    polls_remaining: u32,
    settle: Option<Settle>,
    script: VecDeque<String>,
}

#[derive(Default)]
struct SimState {
    records: BTreeMap<String, SimRecord>,
    tokens: HashMap<String, String>,
    failures: HashMap<(ResourceKind, Operation), VecDeque<Option<InjectedFailure>>>,
    next_scripts: HashMap<ResourceKind, VecDeque<String>>,
    next_settle_failures: HashMap<ResourceKind, String>,
    calls: Vec<String>,
}

/// In-memory stand-in for the remote provisioning API.
pub struct SimulatedApi {
    options: SimOptions,
    inner: RwLock<SimState>,
}

impl Default for SimulatedApi {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

impl SimulatedApi {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            inner: RwLock::new(SimState::default()),
        }
    }

    /// Fail the next call of `op` on `kind`.
    pub async fn fail_next(&self, kind: ResourceKind, op: Operation, failure: InjectedFailure) {
        self.fail_nth(kind, op, 1, failure).await;
    }

    /// Fail the `n`th upcoming call of `op` on `kind`, counting from 1.
    pub async fn fail_nth(
        &self,
        kind: ResourceKind,
        op: Operation,
        n: usize,
        failure: InjectedFailure,
    ) {
        let mut state = self.inner.write().await;
        let queue = state.failures.entry((kind, op)).or_default();
        let index = n.max(1) - 1;
        if queue.len() <= index {
            queue.resize(index + 1, None);
        }
        queue[index] = Some(failure);
    }

    /// The next record of `kind` reports these statuses, one per describe,
    /// before settling normally.
    pub async fn script_next(&self, kind: ResourceKind, statuses: &[&str]) {
        self.inner.write().await.next_scripts.insert(
            kind,
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// The next record of `kind` settles into `FAILED` with this detail.
    pub async fn fail_next_settle(&self, kind: ResourceKind, detail: impl Into<String>) {
        self.inner
            .write()
            .await
            .next_settle_failures
            .insert(kind, detail.into());
    }

    /// Store a resource as is, as if created outside of reconciliation.
    pub async fn insert(&self, resource: RemoteResource) {
        let record = SimRecord {
            resource,
            polls_remaining: 0,
            settle: None,
            script: VecDeque::new(),
        };
        self.inner
            .write()
            .await
            .records
            .insert(record.resource.id.clone(), record);
    }

    /// Remove a resource out of band.
    pub async fn remove(&self, id: &str) -> Option<RemoteResource> {
        self.inner.write().await.records.remove(id).map(|r| r.resource)
    }

    pub async fn get(&self, id: &str) -> Option<RemoteResource> {
        self.inner
            .read()
            .await
            .records
            .get(id)
            .map(|r| r.resource.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Operation names called so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.read().await.calls.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|c| *c == operation)
            .count()
    }

    fn record_call(
        state: &mut SimState,
        kind: ResourceKind,
        op: Operation,
    ) -> Result<(), ApiError> {
        state.calls.push(kind.operation_name(op).to_string());
        match state
            .failures
            .get_mut(&(kind, op))
            .and_then(|q| q.pop_front())
            .flatten()
        {
            Some(failure) => Err(failure.to_api_error()),
            None => Ok(()),
        }
    }

    fn not_found(kind: ResourceKind, id: &str) -> ApiError {
        ApiError::service(
            kind.not_found_code(),
            format!("{} {} does not exist", kind, id),
        )
    }

    /// Advance every record of the family by one describe.
    fn tick(&self, state: &mut SimState, family: Family) {
        let mut removed = Vec::new();
        for (id, record) in state.records.iter_mut() {
            if record.resource.kind.family() != family {
                continue;
            }
            if let Some(status) = record.script.pop_front() {
                record.resource.lifecycle = status;
                continue;
            }
            if record.settle.is_none() {
                continue;
            }
            if record.polls_remaining > 0 {
                record.polls_remaining -= 1;
                continue;
            }
            match record.settle.take() {
                Some(Settle::To(status)) => {
                    record.resource.lifecycle = status;
                    record.resource.administrative_actions.clear();
                }
                Some(Settle::Fail { status, detail }) => {
                    record.resource.lifecycle = status;
                    record.resource.failure_detail = Some(detail);
                    for action in &mut record.resource.administrative_actions {
                        action.status = "FAILED".to_string();
                    }
                }
                Some(Settle::Remove) => removed.push(id.clone()),
                None => {}
            }
        }
        for id in removed {
            debug!(id = %id, "Simulated record removed");
            state.records.remove(&id);
        }
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind.family() {
        Family::FileSystem => "fs",
        Family::Backup => "backup",
        Family::DataRepositoryAssociation => "dra",
        Family::FileCache => "fc",
        Family::StorageVirtualMachine => "svm",
        Family::Volume => "fsvol",
        Family::Snapshot => "fsvolsnap",
        Family::AdministrativeAction => "action",
    }
}

fn created_status(kind: ResourceKind) -> &'static str {
    match kind.family() {
        Family::StorageVirtualMachine | Family::Volume => "CREATED",
        _ => "AVAILABLE",
    }
}

fn updating_status(kind: ResourceKind) -> Option<&'static str> {
    match kind.family() {
        Family::FileSystem | Family::DataRepositoryAssociation | Family::FileCache => {
            Some("UPDATING")
        }
        Family::StorageVirtualMachine | Family::Volume | Family::Snapshot => Some("PENDING"),
        Family::Backup | Family::AdministrativeAction => None,
    }
}

fn deleting_status(kind: ResourceKind) -> Option<&'static str> {
    match kind.family() {
        Family::Backup | Family::AdministrativeAction => None,
        _ => Some("DELETING"),
    }
}

fn update_action_type(kind: ResourceKind) -> Option<&'static str> {
    match kind.family() {
        Family::FileSystem => Some("FILE_SYSTEM_UPDATE"),
        Family::Volume => Some("VOLUME_UPDATE"),
        _ => None,
    }
}

/// Shallow merge of a request body into stored attributes.
fn merge(attributes: &mut Value, body: &Value) {
    if !attributes.is_object() {
        *attributes = Value::Object(Map::new());
    }
    if let (Some(target), Some(source)) = (attributes.as_object_mut(), body.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Describe filters match attribute values, e.g. `file-system-id` against
/// the `FileSystemId` attribute.
fn filter_matches(resource: &RemoteResource, name: &str, values: &[String]) -> bool {
    let key = name
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<String>();
    resource
        .attributes
        .get(&key)
        .and_then(Value::as_str)
        .is_some_and(|v| values.iter().any(|want| want == v))
}

#[async_trait]
impl ProvisioningApi for SimulatedApi {
    async fn create(
        &self,
        kind: ResourceKind,
        mutation: &Mutation,
    ) -> Result<RemoteResource, ApiError> {
        let mut state = self.inner.write().await;
        Self::record_call(&mut state, kind, Operation::Create)?;

        if let Some(existing) = state
            .tokens
            .get(mutation.token.as_str())
            .and_then(|id| state.records.get(id))
        {
            debug!(kind = %kind, id = %existing.resource.id, "Replayed create token");
            return Ok(existing.resource.clone());
        }

        let id = format!(
            "{}-{}",
            id_prefix(kind),
            &Uuid::new_v4().simple().to_string()[..17]
        );
        let mut resource = RemoteResource::new(kind, &id, "CREATING");
        merge(&mut resource.attributes, &mutation.body);
        merge(
            &mut resource.attributes,
            &serde_json::json!({ "CreationTime": Utc::now().to_rfc3339() }),
        );

        let settle = match state.next_settle_failures.remove(&kind) {
            Some(detail) => Settle::Fail {
                status: "FAILED".to_string(),
                detail,
            },
            None => Settle::To(created_status(kind).to_string()),
        };
        let record = SimRecord {
            resource: resource.clone(),
            polls_remaining: self.options.settle_after,
            settle: Some(settle),
            script: state.next_scripts.remove(&kind).unwrap_or_default(),
        };
        state.records.insert(id.clone(), record);
        state
            .tokens
            .insert(mutation.token.as_str().to_string(), id.clone());
        debug!(kind = %kind, id = %id, "Simulated create");
        Ok(resource)
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        query: &DescribeQuery,
        next_token: Option<&str>,
    ) -> Result<Page, ApiError> {
        let mut state = self.inner.write().await;
        Self::record_call(&mut state, kind, Operation::Describe)?;

        let family = kind.family();
        if next_token.is_none() {
            self.tick(&mut state, family);
        }

        for id in &query.ids {
            let known = state
                .records
                .get(id)
                .is_some_and(|r| r.resource.kind.family() == family);
            if !known {
                return Err(Self::not_found(kind, id));
            }
        }

        let matching: Vec<RemoteResource> = state
            .records
            .values()
            .map(|r| &r.resource)
            .filter(|r| r.kind.family() == family)
            .filter(|r| query.ids.is_empty() || query.ids.contains(&r.id))
            .filter(|r| {
                query
                    .filters
                    .iter()
                    .all(|f| filter_matches(r, &f.name, &f.values))
            })
            .cloned()
            .collect();

        let offset = next_token
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let page_size = self.options.page_size.max(1);
        let end = (offset + page_size).min(matching.len());
        let items = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();

        Ok(if end < matching.len() {
            Page::more(items, end.to_string())
        } else {
            Page::last(items)
        })
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        mutation: &Mutation,
    ) -> Result<RemoteResource, ApiError> {
        let mut state = self.inner.write().await;
        Self::record_call(&mut state, kind, Operation::Update)?;

        if !state.records.contains_key(id) {
            return Err(Self::not_found(kind, id));
        }
        let settle_after = self.options.settle_after;
        let failure = state.next_settle_failures.remove(&kind);
        let script = state.next_scripts.remove(&kind);
        let Some(record) = state.records.get_mut(id) else {
            return Err(Self::not_found(kind, id));
        };

        merge(&mut record.resource.attributes, &mutation.body);
        if let Some(status) = updating_status(kind) {
            let settled = record.resource.lifecycle.clone();
            record.resource.lifecycle = status.to_string();
            record.polls_remaining = settle_after;
            record.settle = Some(match failure {
                Some(detail) => Settle::Fail {
                    status: "FAILED".to_string(),
                    detail,
                },
                None => Settle::To(settled),
            });
            if let Some(action_type) = update_action_type(kind) {
                record
                    .resource
                    .administrative_actions
                    .push(AdministrativeAction::new(action_type, "IN_PROGRESS"));
            }
        }
        if let Some(script) = script {
            record.script = script;
        }
        Ok(record.resource.clone())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        _mutation: &Mutation,
    ) -> Result<(), ApiError> {
        let mut state = self.inner.write().await;
        Self::record_call(&mut state, kind, Operation::Delete)?;

        let settle_after = self.options.settle_after;
        let Some(record) = state.records.get_mut(id) else {
            return Err(Self::not_found(kind, id));
        };
        if let Some(status) = deleting_status(kind) {
            record.resource.lifecycle = status.to_string();
        }
        record.polls_remaining = settle_after;
        record.settle = Some(Settle::Remove);
        record.script.clear();
        Ok(())
    }
}
