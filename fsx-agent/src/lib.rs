//! fsx-agent: applies a storage manifest through the reconciliation engine.
//!
//! - [`manifest`] parses and validates the desired state
//! - [`agent::ManifestAgent`] reconciles it in dependency order
//! - [`sim::SimulatedApi`] is an in-memory provisioning API

pub mod agent;
pub mod manifest;
pub mod sim;

pub use agent::{Action, ApplyReport, ManifestAgent, ResourceOutcome};
pub use manifest::{Manifest, ManifestError, Presence, ResourceEntry};
pub use sim::{InjectedFailure, SimOptions, SimulatedApi};
