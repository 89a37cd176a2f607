//! Closed lifecycle status enumerations, one per resource family.
//!
//! Raw status strings from the provisioning API are decoded into these enums
//! at the probe boundary. A string that decodes to nothing is reported as an
//! unexpected status instead of silently matching no wait set.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use thiserror::Error;

/// A status string the enumeration does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized lifecycle status {0:?}")]
pub struct UnknownStatus(pub String);

/// Lifecycle status of one resource family.
pub trait Lifecycle:
    Copy
    + Eq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = UnknownStatus>
    + Send
    + Sync
    + 'static
{
    /// Wire representation, e.g. `AVAILABLE`.
    fn as_str(self) -> &'static str;
}

macro_rules! lifecycle {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl Lifecycle for $name {
            fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownStatus(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Lifecycle::as_str(*self))
            }
        }
    };
}

lifecycle! {
    /// Lustre, Windows, ONTAP and OpenZFS file systems.
    FileSystemLifecycle {
        Available => "AVAILABLE",
        Creating => "CREATING",
        Failed => "FAILED",
        Deleting => "DELETING",
        Misconfigured => "MISCONFIGURED",
        Updating => "UPDATING",
        MisconfiguredUnavailable => "MISCONFIGURED_UNAVAILABLE",
    }
}

lifecycle! {
    BackupLifecycle {
        Available => "AVAILABLE",
        Creating => "CREATING",
        Transferring => "TRANSFERRING",
        Deleted => "DELETED",
        Failed => "FAILED",
        Pending => "PENDING",
        Copying => "COPYING",
    }
}

lifecycle! {
    DataRepositoryLifecycle {
        Creating => "CREATING",
        Available => "AVAILABLE",
        Misconfigured => "MISCONFIGURED",
        Updating => "UPDATING",
        Deleting => "DELETING",
        Failed => "FAILED",
    }
}

lifecycle! {
    FileCacheLifecycle {
        Available => "AVAILABLE",
        Creating => "CREATING",
        Deleting => "DELETING",
        Updating => "UPDATING",
        Failed => "FAILED",
    }
}

lifecycle! {
    StorageVirtualMachineLifecycle {
        Created => "CREATED",
        Creating => "CREATING",
        Deleting => "DELETING",
        Failed => "FAILED",
        Misconfigured => "MISCONFIGURED",
        Pending => "PENDING",
    }
}

lifecycle! {
    /// ONTAP and OpenZFS volumes.
    VolumeLifecycle {
        Creating => "CREATING",
        Created => "CREATED",
        Deleting => "DELETING",
        Failed => "FAILED",
        Misconfigured => "MISCONFIGURED",
        Pending => "PENDING",
        Available => "AVAILABLE",
    }
}

lifecycle! {
    SnapshotLifecycle {
        Pending => "PENDING",
        Creating => "CREATING",
        Deleting => "DELETING",
        Available => "AVAILABLE",
    }
}

lifecycle! {
    /// Status of an administrative action on a file system or volume.
    AdministrativeActionStatus {
        Failed => "FAILED",
        InProgress => "IN_PROGRESS",
        Pending => "PENDING",
        Completed => "COMPLETED",
        UpdatedOptimizing => "UPDATED_OPTIMIZING",
        Optimizing => "OPTIMIZING",
    }
}
