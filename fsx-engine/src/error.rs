//! Reconciliation error types.

use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::kind::ResourceKind;
use crate::resource::RemoteResource;

/// Errors produced by the finder, the waiter and the reconcilers.
///
/// Every variant carries the resource kind and, where one is known, the
/// identifier. The engine never retries on any of them.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    /// A lookup that must match one resource matched several.
    #[error("{kind} lookup {query} matched {count} resources, expected exactly one")]
    TooManyResults {
        kind: ResourceKind,
        query: String,
        count: usize,
    },

    /// The resource stayed pending past the wait timeout.
    #[error(
        "timeout after {timeout:?} waiting for {kind} {id} (last status: {})",
        .last_status.as_deref().unwrap_or("none")
    )]
    Timeout {
        kind: ResourceKind,
        id: String,
        timeout: Duration,
        last_status: Option<String>,
        last_observed: Option<Box<RemoteResource>>,
    },

    /// The resource entered its failure status.
    #[error(
        "{kind} {id} entered {status}: {}",
        .detail.as_deref().unwrap_or("no failure detail reported")
    )]
    RemoteFailure {
        kind: ResourceKind,
        id: String,
        status: String,
        /// Failure message reported by the remote system, verbatim.
        detail: Option<String>,
        last_observed: Option<Box<RemoteResource>>,
    },

    /// The resource reported a status outside every declared set.
    #[error("{kind} {id} reported unexpected status {status:?}, expected one of {expected:?}")]
    UnexpectedStatus {
        kind: ResourceKind,
        id: String,
        status: String,
        expected: Vec<&'static str>,
        last_observed: Option<Box<RemoteResource>>,
    },

    /// A remote call failed for a reason other than "not found".
    #[error("{operation} failed for {kind} {id}: {source}")]
    Transport {
        kind: ResourceKind,
        id: String,
        operation: &'static str,
        source: ApiError,
    },

    #[error("wait for {kind} {id} cancelled")]
    Cancelled { kind: ResourceKind, id: String },

    #[error("invalid wait specification: {reason}")]
    InvalidWaitSpec { reason: String },

    #[error("invalid {kind} request: {reason}")]
    InvalidRequest { kind: ResourceKind, reason: String },
}

impl ReconcileError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        ReconcileError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_wait_spec(reason: impl Into<String>) -> Self {
        ReconcileError::InvalidWaitSpec {
            reason: reason.into(),
        }
    }

    pub fn invalid_request(kind: ResourceKind, reason: impl Into<String>) -> Self {
        ReconcileError::InvalidRequest {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            ReconcileError::NotFound { kind, .. }
            | ReconcileError::TooManyResults { kind, .. }
            | ReconcileError::Timeout { kind, .. }
            | ReconcileError::RemoteFailure { kind, .. }
            | ReconcileError::UnexpectedStatus { kind, .. }
            | ReconcileError::Transport { kind, .. }
            | ReconcileError::Cancelled { kind, .. }
            | ReconcileError::InvalidRequest { kind, .. } => Some(*kind),
            ReconcileError::InvalidWaitSpec { .. } => None,
        }
    }

    /// Whether the caller's layer may safely repeat the operation.
    ///
    /// Only throttled transport failures qualify; the engine itself never
    /// retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Transport { source, .. } => {
                source.is_code("ThrottlingException") || source.is_code("TooManyRequestsException")
            }
            _ => false,
        }
    }

    /// The last resource the waiter saw before giving up, if any.
    pub fn last_observed(&self) -> Option<&RemoteResource> {
        match self {
            ReconcileError::Timeout { last_observed, .. }
            | ReconcileError::RemoteFailure { last_observed, .. }
            | ReconcileError::UnexpectedStatus { last_observed, .. } => last_observed.as_deref(),
            _ => None,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
