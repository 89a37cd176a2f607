//! Single-shot status snapshots for the waiter.

use async_trait::async_trait;

use crate::error::Result;
use crate::finder::Finder;
use crate::kind::ResourceKind;
use crate::resource::RemoteResource;
use crate::status::{AdministrativeActionStatus, Lifecycle};

/// One observation of a resource.
///
/// `resource == None` means the resource does not exist (yet or anymore);
/// the status is then empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub resource: Option<RemoteResource>,
    pub status: String,
}

impl ProbeOutcome {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn observed(resource: RemoteResource) -> Self {
        Self {
            status: resource.lifecycle.clone(),
            resource: Some(resource),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.resource.is_none()
    }
}

/// Something the waiter can poll.
///
/// Returning `Err` aborts the wait immediately.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Identifier used in logs and errors.
    fn target_id(&self) -> &str;

    async fn probe(&self) -> Result<ProbeOutcome>;
}

/// Probes a resource's own lifecycle status through a [`Finder`].
pub struct ResourceProbe {
    finder: Finder,
    id: String,
}

impl ResourceProbe {
    pub fn new(finder: Finder, id: impl Into<String>) -> Self {
        Self {
            finder,
            id: id.into(),
        }
    }
}

#[async_trait]
impl StatusProbe for ResourceProbe {
    fn kind(&self) -> ResourceKind {
        self.finder.kind()
    }

    fn target_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self) -> Result<ProbeOutcome> {
        match self.finder.find_by_id(&self.id).await {
            Ok(resource) => Ok(ProbeOutcome::observed(resource)),
            Err(e) if e.is_not_found() => Ok(ProbeOutcome::absent()),
            Err(e) => Err(e),
        }
    }
}

/// Probes one administrative action of a file system or volume.
///
/// The remote system drops finished actions from the owner's listing, so an
/// action type that is no longer listed reads as `COMPLETED`.
pub struct ActionProbe {
    finder: Finder,
    owner_id: String,
    action_type: String,
    label: String,
}

impl ActionProbe {
    pub fn new(finder: Finder, owner_id: impl Into<String>, action_type: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let action_type = action_type.into();
        let label = format!("{}/{}", owner_id, action_type);
        Self {
            finder,
            owner_id,
            action_type,
            label,
        }
    }
}

#[async_trait]
impl StatusProbe for ActionProbe {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AdministrativeAction
    }

    fn target_id(&self) -> &str {
        &self.label
    }

    async fn probe(&self) -> Result<ProbeOutcome> {
        let owner = match self.finder.find_by_id(&self.owner_id).await {
            Ok(owner) => owner,
            Err(e) if e.is_not_found() => return Ok(ProbeOutcome::absent()),
            Err(e) => return Err(e),
        };

        let mut action = RemoteResource::new(
            ResourceKind::AdministrativeAction,
            self.label.clone(),
            AdministrativeActionStatus::Completed.as_str(),
        );
        if let Some(listed) = owner.administrative_action(&self.action_type) {
            action.lifecycle = listed.status.clone();
            action.failure_detail = listed.failure_detail.clone();
        }
        Ok(ProbeOutcome::observed(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, DescribeQuery, Mutation, ProvisioningApi};
    use crate::error::ReconcileError;
    use crate::resource::{AdministrativeAction, Page};
    use std::sync::Arc;

    struct FixedApi {
        reply: std::result::Result<Vec<RemoteResource>, (&'static str, &'static str)>,
    }

    #[async_trait]
    impl ProvisioningApi for FixedApi {
        async fn create(&self, _: ResourceKind, _: &Mutation) -> std::result::Result<RemoteResource, ApiError> {
            Err(ApiError::transport("not supported"))
        }

        async fn describe(
            &self,
            _: ResourceKind,
            _: &DescribeQuery,
            _: Option<&str>,
        ) -> std::result::Result<Page, ApiError> {
            match &self.reply {
                Ok(items) => Ok(Page::last(items.clone())),
                Err((code, message)) => Err(ApiError::service(*code, *message)),
            }
        }

        async fn update(&self, _: ResourceKind, _: &str, _: &Mutation) -> std::result::Result<RemoteResource, ApiError> {
            Err(ApiError::transport("not supported"))
        }

        async fn delete(&self, _: ResourceKind, _: &str, _: &Mutation) -> std::result::Result<(), ApiError> {
            Err(ApiError::transport("not supported"))
        }
    }

    fn finder(reply: std::result::Result<Vec<RemoteResource>, (&'static str, &'static str)>) -> Finder {
        Finder::new(ResourceKind::LustreFileSystem, Arc::new(FixedApi { reply }))
    }

    #[tokio::test]
    async fn test_found_resource_reports_its_status() {
        let fs = RemoteResource::new(ResourceKind::LustreFileSystem, "fs-001", "CREATING");
        let probe = ResourceProbe::new(finder(Ok(vec![fs])), "fs-001");
        let outcome = probe.probe().await.unwrap();
        assert_eq!(outcome.status, "CREATING");
        assert_eq!(outcome.resource.unwrap().id, "fs-001");
    }

    #[tokio::test]
    async fn test_not_found_is_absent_not_error() {
        let probe = ResourceProbe::new(
            finder(Err(("FileSystemNotFound", "gone"))),
            "fs-001",
        );
        let outcome = probe.probe().await.unwrap();
        assert!(outcome.is_absent());
        assert_eq!(outcome.status, "");
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let probe = ResourceProbe::new(finder(Err(("AccessDenied", "no"))), "fs-001");
        let err = probe.probe().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_listed_action_reports_status_and_detail() {
        let mut fs = RemoteResource::new(ResourceKind::LustreFileSystem, "fs-001", "AVAILABLE");
        let mut action = AdministrativeAction::new("FILE_SYSTEM_UPDATE", "FAILED");
        action.failure_detail = Some("throughput change rejected".to_string());
        fs.administrative_actions.push(action);

        let probe = ActionProbe::new(finder(Ok(vec![fs])), "fs-001", "FILE_SYSTEM_UPDATE");
        let outcome = probe.probe().await.unwrap();
        assert_eq!(outcome.status, "FAILED");
        assert_eq!(
            outcome.resource.unwrap().failure_detail.as_deref(),
            Some("throughput change rejected")
        );
    }

    #[tokio::test]
    async fn test_unlisted_action_reads_as_completed() {
        let fs = RemoteResource::new(ResourceKind::LustreFileSystem, "fs-001", "AVAILABLE");
        let probe = ActionProbe::new(finder(Ok(vec![fs])), "fs-001", "STORAGE_OPTIMIZATION");
        let outcome = probe.probe().await.unwrap();
        assert_eq!(outcome.status, "COMPLETED");
        assert_eq!(probe.target_id(), "fs-001/STORAGE_OPTIMIZATION");
    }
}
