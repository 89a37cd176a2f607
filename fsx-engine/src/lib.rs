//! fsx-engine: lifecycle reconciliation for asynchronously provisioned storage.
//!
//! Every mutating call against the provisioning API returns a resource in a
//! transitional state. This crate drives such resources to a terminal state:
//! - [`finder::Finder`] locates a resource through paged describe calls
//! - [`probe::StatusProbe`] turns a lookup into a single status snapshot
//! - [`wait::Waiter`] polls a probe against a [`wait::WaitSpec`]
//! - [`reconciler::ResourceReconciler`] sequences create/read/update/delete
//!
//! Per-kind behaviour (status enumerations, wait specs, timeouts) is data in
//! [`status`] and [`profile`], not code branches.

pub mod api;
pub mod blocking;
pub mod config;
pub mod error;
pub mod finder;
pub mod kind;
pub mod probe;
pub mod profile;
pub mod reconciler;
pub mod resource;
pub mod status;
pub mod wait;

pub use api::{ApiError, DescribeQuery, Filter, Mutation, ProvisioningApi, RequestToken};
pub use config::{ConfigError, EngineConfig};
pub use error::{ReconcileError, Result};
pub use finder::Finder;
pub use kind::{Operation, ResourceKind};
pub use probe::{ActionProbe, ProbeOutcome, ResourceProbe, StatusProbe};
pub use profile::{KindProfile, Timeouts, reconciler_for};
pub use reconciler::{ReadOutcome, Reconciler, ResourceReconciler, UpdateGroup, UpdatePlan};
pub use resource::{AdministrativeAction, Page, RemoteResource};
pub use status::Lifecycle;
pub use wait::{WaitSpec, Waiter};
