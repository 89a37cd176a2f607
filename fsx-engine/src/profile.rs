//! Per-kind wait specifications and timeouts.
//!
//! Each family's status sets are a constant [`StatusTable`]; a
//! [`KindProfile`] combines a table with the kind's effective timeouts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ProvisioningApi;
use crate::config::EngineConfig;
use crate::error::{ReconcileError, Result};
use crate::kind::ResourceKind;
use crate::reconciler::{Reconciler, ResourceReconciler};
use crate::status::{
    AdministrativeActionStatus, BackupLifecycle, DataRepositoryLifecycle, FileCacheLifecycle,
    FileSystemLifecycle, Lifecycle, SnapshotLifecycle, StorageVirtualMachineLifecycle,
    VolumeLifecycle,
};
use crate::wait::WaitSpec;

/// Create, update and delete timeouts of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Timeouts {
    pub const fn minutes(create: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    pub fn defaults_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::LustreFileSystem => Self::minutes(60, 60, 60),
            ResourceKind::WindowsFileSystem => Self::minutes(45, 45, 30),
            ResourceKind::OntapFileSystem => Self::minutes(120, 120, 120),
            ResourceKind::OpenZfsFileSystem => Self::minutes(60, 60, 60),
            ResourceKind::Backup => Self::minutes(10, 10, 10),
            ResourceKind::DataRepositoryAssociation => Self::minutes(10, 10, 10),
            ResourceKind::FileCache => Self::minutes(40, 40, 20),
            ResourceKind::StorageVirtualMachine => Self::minutes(30, 30, 30),
            ResourceKind::OntapVolume | ResourceKind::OpenZfsVolume => Self::minutes(30, 30, 30),
            ResourceKind::OpenZfsSnapshot => Self::minutes(10, 10, 10),
            ResourceKind::AdministrativeAction => Self::minutes(60, 60, 60),
        }
    }

    /// Multiply every timeout by `factor`, saturating at [`Duration::MAX`].
    pub fn scaled(self, factor: f64) -> Self {
        let scale = |d: Duration| {
            Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        };
        Self {
            create: scale(self.create),
            update: scale(self.update),
            delete: scale(self.delete),
        }
    }
}

/// Pending and target statuses of one transition.
#[derive(Debug)]
pub struct Transition<S: 'static> {
    pub pending: &'static [S],
    pub target: &'static [S],
}

/// Status sets of one resource family.
#[derive(Debug)]
pub struct StatusTable<S: 'static> {
    pub created: Transition<S>,
    /// `None` when updates complete synchronously.
    pub updated: Option<Transition<S>>,
    /// Delete waits always accept absence; `target` lists extra terminal statuses.
    pub deleted: Transition<S>,
    pub failure: Option<S>,
}

pub const FILE_SYSTEM: StatusTable<FileSystemLifecycle> = {
    use FileSystemLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating],
            target: &[Available, Misconfigured],
        },
        updated: Some(Transition {
            pending: &[Updating],
            target: &[Available, Misconfigured],
        }),
        deleted: Transition {
            pending: &[Available, Deleting],
            target: &[],
        },
        failure: Some(Failed),
    }
};

pub const BACKUP: StatusTable<BackupLifecycle> = {
    use BackupLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating, Pending, Transferring, Copying],
            target: &[Available],
        },
        updated: None,
        deleted: Transition {
            pending: &[Available, Creating, Pending, Transferring],
            target: &[Deleted],
        },
        failure: Some(Failed),
    }
};

pub const DATA_REPOSITORY_ASSOCIATION: StatusTable<DataRepositoryLifecycle> = {
    use DataRepositoryLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating],
            target: &[Available],
        },
        updated: Some(Transition {
            pending: &[Updating],
            target: &[Available, Misconfigured],
        }),
        deleted: Transition {
            pending: &[Available, Deleting],
            target: &[],
        },
        failure: Some(Failed),
    }
};

pub const FILE_CACHE: StatusTable<FileCacheLifecycle> = {
    use FileCacheLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating],
            target: &[Available],
        },
        updated: Some(Transition {
            pending: &[Updating],
            target: &[Available],
        }),
        deleted: Transition {
            pending: &[Available, Deleting],
            target: &[],
        },
        failure: Some(Failed),
    }
};

pub const STORAGE_VIRTUAL_MACHINE: StatusTable<StorageVirtualMachineLifecycle> = {
    use StorageVirtualMachineLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating, Pending],
            target: &[Created, Misconfigured],
        },
        updated: Some(Transition {
            pending: &[Pending],
            target: &[Created, Misconfigured],
        }),
        deleted: Transition {
            pending: &[Created, Deleting],
            target: &[],
        },
        failure: Some(Failed),
    }
};

pub const VOLUME: StatusTable<VolumeLifecycle> = {
    use VolumeLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating, Pending],
            target: &[Created, Misconfigured, Available],
        },
        updated: Some(Transition {
            pending: &[Pending],
            target: &[Created, Misconfigured, Available],
        }),
        deleted: Transition {
            pending: &[Created, Misconfigured, Available, Deleting],
            target: &[],
        },
        failure: Some(Failed),
    }
};

pub const SNAPSHOT: StatusTable<SnapshotLifecycle> = {
    use SnapshotLifecycle::*;
    StatusTable {
        created: Transition {
            pending: &[Creating, Pending],
            target: &[Available],
        },
        updated: Some(Transition {
            pending: &[Pending],
            target: &[Available],
        }),
        deleted: Transition {
            pending: &[Pending, Deleting],
            target: &[],
        },
        failure: None,
    }
};

/// Wait specifications of one reconcilable kind.
#[derive(Debug, Clone)]
pub struct KindProfile<S: Lifecycle> {
    pub kind: ResourceKind,
    pub created: WaitSpec<S>,
    pub updated: Option<WaitSpec<S>>,
    pub deleted: WaitSpec<S>,
}

impl<S: Lifecycle> KindProfile<S> {
    pub fn from_table(
        kind: ResourceKind,
        table: &StatusTable<S>,
        timeouts: Timeouts,
        config: &EngineConfig,
    ) -> Result<Self> {
        let spec = |t: &Transition<S>, timeout: Duration| {
            let mut builder = WaitSpec::builder(timeout)
                .pending(t.pending.iter().copied())
                .target(t.target.iter().copied())
                .poll_interval(config.poll_interval())
                .not_found_checks(config.not_found_checks);
            if let Some(failure) = table.failure {
                builder = builder.failure(failure);
            }
            builder
        };

        Ok(Self {
            kind,
            created: spec(&table.created, timeouts.create).build()?,
            updated: table
                .updated
                .as_ref()
                .map(|t| spec(t, timeouts.update).build())
                .transpose()?,
            deleted: spec(&table.deleted, timeouts.delete).until_absent().build()?,
        })
    }
}

/// Wait specification for an administrative action started by an update.
///
/// `OPTIMIZING` means the remote system is still rebalancing storage and
/// keeps the wait pending.
pub fn administrative_action(
    timeout: Duration,
    config: &EngineConfig,
) -> Result<WaitSpec<AdministrativeActionStatus>> {
    use AdministrativeActionStatus::*;
    WaitSpec::builder(timeout)
        .pending([Pending, InProgress, Optimizing])
        .target([Completed, UpdatedOptimizing])
        .failure(Failed)
        .poll_interval(config.poll_interval())
        .not_found_checks(config.not_found_checks)
        .build()
}

/// Build the reconciler for a kind.
///
/// Administrative actions are not reconciled on their own; they are waited
/// on as part of a file system or volume update.
pub fn reconciler_for(
    kind: ResourceKind,
    api: Arc<dyn ProvisioningApi>,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<Box<dyn Reconciler>> {
    let timeouts = config.timeouts_for(kind);

    fn boxed<S: Lifecycle>(
        kind: ResourceKind,
        table: &StatusTable<S>,
        timeouts: Timeouts,
        api: Arc<dyn ProvisioningApi>,
        config: &EngineConfig,
        cancel: CancellationToken,
        with_actions: bool,
    ) -> Result<Box<dyn Reconciler>> {
        let profile = KindProfile::from_table(kind, table, timeouts, config)?;
        let mut reconciler = ResourceReconciler::new(api, profile).with_cancellation(cancel);
        if with_actions {
            reconciler = reconciler.with_action_wait(administrative_action(timeouts.update, config)?);
        }
        Ok(Box::new(reconciler))
    }

    match kind {
        ResourceKind::LustreFileSystem
        | ResourceKind::WindowsFileSystem
        | ResourceKind::OntapFileSystem
        | ResourceKind::OpenZfsFileSystem => {
            boxed(kind, &FILE_SYSTEM, timeouts, api, config, cancel, true)
        }
        ResourceKind::Backup => boxed(kind, &BACKUP, timeouts, api, config, cancel, false),
        ResourceKind::DataRepositoryAssociation => boxed(
            kind,
            &DATA_REPOSITORY_ASSOCIATION,
            timeouts,
            api,
            config,
            cancel,
            false,
        ),
        ResourceKind::FileCache => boxed(kind, &FILE_CACHE, timeouts, api, config, cancel, false),
        ResourceKind::StorageVirtualMachine => boxed(
            kind,
            &STORAGE_VIRTUAL_MACHINE,
            timeouts,
            api,
            config,
            cancel,
            false,
        ),
        ResourceKind::OntapVolume | ResourceKind::OpenZfsVolume => {
            boxed(kind, &VOLUME, timeouts, api, config, cancel, true)
        }
        ResourceKind::OpenZfsSnapshot => boxed(kind, &SNAPSHOT, timeouts, api, config, cancel, false),
        ResourceKind::AdministrativeAction => Err(ReconcileError::invalid_request(
            kind,
            "administrative actions are waited on through their owning resource",
        )),
    }
}
