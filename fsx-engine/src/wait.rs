//! Polling state machine.
//!
//! A [`Waiter`] calls a [`StatusProbe`] on a fixed delay and classifies each
//! observation against a [`WaitSpec`]:
//! - pending status (or tolerated absence): sleep and poll again
//! - target status (or absence on a delete wait): done
//! - failure status: [`ReconcileError::RemoteFailure`] with the remote detail
//! - anything else: [`ReconcileError::UnexpectedStatus`], without retrying

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::probe::{ProbeOutcome, StatusProbe};
use crate::resource::RemoteResource;
use crate::status::Lifecycle;

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive absent polls tolerated by a wait that expects the resource.
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Immutable description of one wait: which statuses keep polling, which
/// end it, and for how long.
#[derive(Debug, Clone)]
pub struct WaitSpec<S: Lifecycle> {
    pending: HashSet<S>,
    target: HashSet<S>,
    failure: Option<S>,
    timeout: Duration,
    poll_interval: Duration,
    absent_is_target: bool,
    not_found_checks: u32,
}

/// Builder for [`WaitSpec`]; invariants are checked in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct WaitSpecBuilder<S: Lifecycle> {
    pending: Vec<S>,
    target: Vec<S>,
    failure: Option<S>,
    timeout: Duration,
    poll_interval: Duration,
    absent_is_target: bool,
    not_found_checks: u32,
}

impl<S: Lifecycle> WaitSpecBuilder<S> {
    pub fn pending(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.pending.extend(statuses);
        self
    }

    pub fn target(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.target.extend(statuses);
        self
    }

    pub fn failure(mut self, status: S) -> Self {
        self.failure = Some(status);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The wait succeeds once the resource is gone.
    pub fn until_absent(mut self) -> Self {
        self.absent_is_target = true;
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn build(self) -> Result<WaitSpec<S>> {
        let pending: HashSet<S> = self.pending.into_iter().collect();
        let target: HashSet<S> = self.target.into_iter().collect();

        if let Some(overlap) = pending.intersection(&target).next() {
            return Err(ReconcileError::invalid_wait_spec(format!(
                "{} is both pending and target",
                overlap
            )));
        }
        if let Some(failure) = self.failure {
            if pending.contains(&failure) || target.contains(&failure) {
                return Err(ReconcileError::invalid_wait_spec(format!(
                    "failure status {} is also pending or target",
                    failure
                )));
            }
        }
        if target.is_empty() && !self.absent_is_target {
            return Err(ReconcileError::invalid_wait_spec(
                "no target status and absence is not success",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ReconcileError::invalid_wait_spec("timeout must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(ReconcileError::invalid_wait_spec(
                "poll interval must be positive",
            ));
        }

        Ok(WaitSpec {
            pending,
            target,
            failure: self.failure,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            absent_is_target: self.absent_is_target,
            not_found_checks: self.not_found_checks,
        })
    }
}

/// Classification of one probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tick<S> {
    Absent,
    Pending,
    Target,
    Failed(S),
    Unknown(String),
}

impl<S: Lifecycle> WaitSpec<S> {
    pub fn builder(timeout: Duration) -> WaitSpecBuilder<S> {
        WaitSpecBuilder {
            pending: Vec::new(),
            target: Vec::new(),
            failure: None,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            absent_is_target: false,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn absent_is_target(&self) -> bool {
        self.absent_is_target
    }

    pub fn is_pending(&self, status: S) -> bool {
        self.pending.contains(&status)
    }

    pub fn is_target(&self, status: S) -> bool {
        self.target.contains(&status)
    }

    /// Same spec with a different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Same spec with a different poll interval.
    pub fn with_poll_interval(&self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self.clone()
        }
    }

    /// Statuses that end or continue the wait, for error messages.
    fn expected(&self) -> Vec<&'static str> {
        let mut expected: Vec<&'static str> = self
            .pending
            .iter()
            .chain(self.target.iter())
            .map(|s| s.as_str())
            .collect();
        expected.sort_unstable();
        expected
    }

    fn classify(&self, outcome: &ProbeOutcome) -> Tick<S> {
        if outcome.is_absent() {
            return if self.absent_is_target {
                Tick::Target
            } else {
                Tick::Absent
            };
        }
        match outcome.status.parse::<S>() {
            Ok(status) if self.target.contains(&status) => Tick::Target,
            Ok(status) if self.pending.contains(&status) => Tick::Pending,
            Ok(status) if self.failure == Some(status) => Tick::Failed(status),
            _ => Tick::Unknown(outcome.status.clone()),
        }
    }
}

/// Drives a probe to a terminal state.
///
/// A waiter holds no state between calls; independent resources can be
/// waited on concurrently with separate waiters.
pub struct Waiter<'a, S: Lifecycle> {
    spec: &'a WaitSpec<S>,
    cancel: CancellationToken,
}

impl<'a, S: Lifecycle> Waiter<'a, S> {
    pub fn new(spec: &'a WaitSpec<S>) -> Self {
        Self {
            spec,
            cancel: CancellationToken::new(),
        }
    }

    /// Checked before every poll and while sleeping.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll until the probe reaches a terminal state.
    ///
    /// Returns the final resource, or `None` when a delete wait ended with
    /// the resource gone.
    pub async fn wait(&self, probe: &dyn StatusProbe) -> Result<Option<RemoteResource>> {
        let spec = self.spec;
        let kind = probe.kind();
        let id = probe.target_id().to_string();
        let started = Instant::now();
        // An unrepresentable deadline means the wait never times out.
        let deadline = started
            .checked_add(spec.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);

        let mut last_observed: Option<RemoteResource> = None;
        let mut last_status: Option<String> = None;
        let mut absent_ticks: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                warn!(kind = %kind, id = %id, "Wait cancelled");
                return Err(ReconcileError::Cancelled { kind, id });
            }

            let outcome = probe.probe().await?;
            let tick = spec.classify(&outcome);
            let absent = outcome.is_absent();
            debug!(
                kind = %kind,
                id = %id,
                status = %outcome.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Polled"
            );
            if outcome.resource.is_some() {
                last_status = Some(outcome.status.clone());
                last_observed = outcome.resource;
            }

            match tick {
                Tick::Target => {
                    info!(
                        kind = %kind,
                        id = %id,
                        status = %outcome.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Reached target state"
                    );
                    return Ok(if absent { None } else { last_observed });
                }
                Tick::Failed(status) => {
                    let detail = last_observed
                        .as_ref()
                        .and_then(|r| r.failure_detail.clone());
                    warn!(kind = %kind, id = %id, status = %status, detail = ?detail, "Entered failure state");
                    return Err(ReconcileError::RemoteFailure {
                        kind,
                        id,
                        status: status.as_str().to_string(),
                        detail,
                        last_observed: last_observed.map(Box::new),
                    });
                }
                Tick::Unknown(status) => {
                    warn!(kind = %kind, id = %id, status = %status, "Unexpected status");
                    return Err(ReconcileError::UnexpectedStatus {
                        kind,
                        id,
                        status,
                        expected: spec.expected(),
                        last_observed: last_observed.map(Box::new),
                    });
                }
                Tick::Absent => {
                    absent_ticks += 1;
                    if absent_ticks > spec.not_found_checks {
                        warn!(kind = %kind, id = %id, checks = absent_ticks, "Resource never appeared");
                        return Err(ReconcileError::NotFound { kind, id });
                    }
                }
                Tick::Pending => {
                    absent_ticks = 0;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    kind = %kind,
                    id = %id,
                    timeout_secs = spec.timeout.as_secs(),
                    last_status = ?last_status,
                    "Timeout waiting for state change"
                );
                return Err(ReconcileError::Timeout {
                    kind,
                    id,
                    timeout: spec.timeout,
                    last_status,
                    last_observed: last_observed.map(Box::new),
                });
            }

            let pause = spec.poll_interval.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(kind = %kind, id = %id, "Wait cancelled");
                    return Err(ReconcileError::Cancelled { kind, id });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
