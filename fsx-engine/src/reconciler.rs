//! Create, read, update and delete sequencing for one resource kind.
//!
//! A reconciler issues the mutating call, then waits through the kind's
//! [`KindProfile`] until the resource settles, then reads it back. It never
//! retries: every error is surfaced to the caller as is.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Mutation, ProvisioningApi, RequestToken};
use crate::error::{ReconcileError, Result};
use crate::finder::Finder;
use crate::kind::{Operation, ResourceKind};
use crate::probe::{ActionProbe, ResourceProbe};
use crate::profile::KindProfile;
use crate::resource::RemoteResource;
use crate::status::{AdministrativeActionStatus, Lifecycle};
use crate::wait::{WaitSpec, Waiter};

/// Result of reading back a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(RemoteResource),
    /// A resource the caller believed existed is gone.
    Drifted { kind: ResourceKind, id: String },
}

impl ReadOutcome {
    pub fn into_resource(self) -> Option<RemoteResource> {
        match self {
            ReadOutcome::Found(resource) => Some(resource),
            ReadOutcome::Drifted { .. } => None,
        }
    }
}

/// One attribute group of an update, sent as its own call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateGroup {
    pub name: String,
    pub changed: bool,
    pub mutation: Mutation,
    /// Administrative action type the update starts, e.g. `FILE_SYSTEM_UPDATE`.
    pub administrative_action: Option<String>,
}

impl UpdateGroup {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            changed: true,
            mutation: Mutation::new(body),
            administrative_action: None,
        }
    }

    pub fn unchanged(mut self) -> Self {
        self.changed = false;
        self
    }

    pub fn with_token(mut self, token: impl Into<RequestToken>) -> Self {
        self.mutation.token = token.into();
        self
    }

    pub fn awaiting_action(mut self, action_type: impl Into<String>) -> Self {
        self.administrative_action = Some(action_type.into());
        self
    }
}

/// Ordered attribute groups of an update. The diff is computed by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    groups: Vec<UpdateGroup>,
}

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, group: UpdateGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn groups(&self) -> &[UpdateGroup] {
        &self.groups
    }

    pub fn changed(&self) -> impl Iterator<Item = &UpdateGroup> {
        self.groups.iter().filter(|g| g.changed)
    }

    pub fn has_changes(&self) -> bool {
        self.changed().next().is_some()
    }
}

impl FromIterator<UpdateGroup> for UpdatePlan {
    fn from_iter<I: IntoIterator<Item = UpdateGroup>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

/// Lifecycle operations of one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Create the resource and wait until it settles.
    async fn create(&self, desired: &Mutation) -> Result<RemoteResource>;

    /// Read the resource. `existing` tells whether the caller already knew
    /// it; only then does a missing resource read as drift.
    async fn read(&self, id: &str, existing: bool) -> Result<ReadOutcome>;

    /// Apply the changed groups in order and return the observed state.
    async fn update(&self, id: &str, plan: &UpdatePlan) -> Result<RemoteResource>;

    /// Delete the resource and wait until it is gone. Already gone is success.
    async fn delete(&self, id: &str, request: &Mutation) -> Result<()>;
}

/// Reconciler driven entirely by a [`KindProfile`].
pub struct ResourceReconciler<S: Lifecycle> {
    api: Arc<dyn ProvisioningApi>,
    finder: Finder,
    profile: KindProfile<S>,
    action_wait: Option<WaitSpec<AdministrativeActionStatus>>,
    cancel: CancellationToken,
}

impl<S: Lifecycle> ResourceReconciler<S> {
    pub fn new(api: Arc<dyn ProvisioningApi>, profile: KindProfile<S>) -> Self {
        Self {
            finder: Finder::new(profile.kind, api.clone()),
            api,
            profile,
            action_wait: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Allow update groups to wait for the administrative action they start.
    pub fn with_action_wait(mut self, spec: WaitSpec<AdministrativeActionStatus>) -> Self {
        self.action_wait = Some(spec);
        self
    }

    pub fn profile(&self) -> &KindProfile<S> {
        &self.profile
    }

    fn call_error(&self, op: Operation, id: &str, e: ApiError) -> ReconcileError {
        let kind = self.profile.kind;
        if e.is_code(kind.not_found_code()) {
            return ReconcileError::not_found(kind, id);
        }
        ReconcileError::Transport {
            kind,
            id: id.to_string(),
            operation: kind.operation_name(op),
            source: e,
        }
    }

    async fn wait_for(&self, spec: &WaitSpec<S>, id: &str) -> Result<Option<RemoteResource>> {
        let probe = ResourceProbe::new(self.finder.clone(), id);
        Waiter::new(spec)
            .with_cancellation(self.cancel.clone())
            .wait(&probe)
            .await
    }

    async fn wait_for_action(&self, id: &str, action_type: &str) -> Result<()> {
        let Some(spec) = &self.action_wait else {
            return Err(ReconcileError::invalid_request(
                self.profile.kind,
                format!("{} has no administrative actions", self.profile.kind),
            ));
        };
        let probe = ActionProbe::new(self.finder.clone(), id, action_type);
        Waiter::new(spec)
            .with_cancellation(self.cancel.clone())
            .wait(&probe)
            .await?;
        Ok(())
    }

    fn validate_body(&self, body: &Value) -> Result<()> {
        if body.is_object() {
            Ok(())
        } else {
            Err(ReconcileError::invalid_request(
                self.profile.kind,
                "request body must be a JSON object",
            ))
        }
    }
}

#[async_trait]
impl<S: Lifecycle> Reconciler for ResourceReconciler<S> {
    fn kind(&self) -> ResourceKind {
        self.profile.kind
    }

    async fn create(&self, desired: &Mutation) -> Result<RemoteResource> {
        let kind = self.profile.kind;
        self.validate_body(&desired.body)?;

        let created = self
            .api
            .create(kind, desired)
            .await
            .map_err(|e| self.call_error(Operation::Create, desired.token.as_str(), e))?;
        let id = created.id;
        info!(kind = %kind, id = %id, status = %created.lifecycle, "Created");

        self.wait_for(&self.profile.created, &id).await?;

        match self.read(&id, false).await? {
            ReadOutcome::Found(resource) => Ok(resource),
            ReadOutcome::Drifted { kind, id } => Err(ReconcileError::NotFound { kind, id }),
        }
    }

    async fn read(&self, id: &str, existing: bool) -> Result<ReadOutcome> {
        match self.finder.find_by_id(id).await {
            Ok(resource) => Ok(ReadOutcome::Found(resource)),
            Err(e) if e.is_not_found() && existing => {
                warn!(kind = %self.profile.kind, id = %id, "Resource removed outside of reconciliation");
                Ok(ReadOutcome::Drifted {
                    kind: self.profile.kind,
                    id: id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, id: &str, plan: &UpdatePlan) -> Result<RemoteResource> {
        let kind = self.profile.kind;
        for group in plan.changed() {
            self.validate_body(&group.mutation.body)?;
            if group.administrative_action.is_some() && self.action_wait.is_none() {
                return Err(ReconcileError::invalid_request(
                    kind,
                    format!("group {} waits for an administrative action", group.name),
                ));
            }
        }

        for group in plan.changed() {
            debug!(kind = %kind, id = %id, group = %group.name, "Updating");
            self.api
                .update(kind, id, &group.mutation)
                .await
                .map_err(|e| self.call_error(Operation::Update, id, e))?;

            if let Some(spec) = &self.profile.updated {
                self.wait_for(spec, id).await?;
            }
            if let Some(action_type) = &group.administrative_action {
                self.wait_for_action(id, action_type).await?;
            }
            info!(kind = %kind, id = %id, group = %group.name, "Updated");
        }

        match self.read(id, true).await? {
            ReadOutcome::Found(resource) => Ok(resource),
            ReadOutcome::Drifted { kind, id } => Err(ReconcileError::NotFound { kind, id }),
        }
    }

    async fn delete(&self, id: &str, request: &Mutation) -> Result<()> {
        let kind = self.profile.kind;
        match self.api.delete(kind, id, request).await {
            Ok(()) => {}
            Err(e) if e.is_code(kind.not_found_code()) => {
                info!(kind = %kind, id = %id, "Already deleted");
                return Ok(());
            }
            Err(e) => return Err(self.call_error(Operation::Delete, id, e)),
        }

        self.wait_for(&self.profile.deleted, id).await?;
        info!(kind = %kind, id = %id, "Deleted");
        Ok(())
    }
}
