//! Synchronous entry point for callers outside an async runtime.

use tokio::runtime::{Builder, Runtime};

use crate::api::Mutation;
use crate::error::Result;
use crate::kind::ResourceKind;
use crate::reconciler::{ReadOutcome, Reconciler, UpdatePlan};
use crate::resource::RemoteResource;

/// Runs a [`Reconciler`] on its own current-thread runtime.
///
/// Each call blocks the calling thread until the operation finishes. Must not
/// be used from inside another tokio runtime.
pub struct BlockingReconciler {
    inner: Box<dyn Reconciler>,
    runtime: Runtime,
}

impl BlockingReconciler {
    pub fn new(inner: Box<dyn Reconciler>) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self { inner, runtime })
    }

    pub fn kind(&self) -> ResourceKind {
        self.inner.kind()
    }

    pub fn create(&self, desired: &Mutation) -> Result<RemoteResource> {
        self.runtime.block_on(self.inner.create(desired))
    }

    pub fn read(&self, id: &str, existing: bool) -> Result<ReadOutcome> {
        self.runtime.block_on(self.inner.read(id, existing))
    }

    pub fn update(&self, id: &str, plan: &UpdatePlan) -> Result<RemoteResource> {
        self.runtime.block_on(self.inner.update(id, plan))
    }

    pub fn delete(&self, id: &str, request: &Mutation) -> Result<()> {
        self.runtime.block_on(self.inner.delete(id, request))
    }
}
