//! Resource kinds and the remote operations that act on them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A category of managed storage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    LustreFileSystem,
    WindowsFileSystem,
    OntapFileSystem,
    #[serde(rename = "openzfs_file_system")]
    OpenZfsFileSystem,
    Backup,
    DataRepositoryAssociation,
    FileCache,
    StorageVirtualMachine,
    OntapVolume,
    #[serde(rename = "openzfs_volume")]
    OpenZfsVolume,
    #[serde(rename = "openzfs_snapshot")]
    OpenZfsSnapshot,
    /// Long-running operation attached to a file system or volume.
    AdministrativeAction,
}

/// Resource kinds sharing one describe operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    FileSystem,
    Backup,
    DataRepositoryAssociation,
    FileCache,
    StorageVirtualMachine,
    Volume,
    Snapshot,
    AdministrativeAction,
}

/// Remote operation verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Describe,
    Update,
    Delete,
}

impl ResourceKind {
    /// Kinds that can be reconciled directly.
    pub const RECONCILABLE: [ResourceKind; 11] = [
        ResourceKind::LustreFileSystem,
        ResourceKind::WindowsFileSystem,
        ResourceKind::OntapFileSystem,
        ResourceKind::OpenZfsFileSystem,
        ResourceKind::Backup,
        ResourceKind::DataRepositoryAssociation,
        ResourceKind::FileCache,
        ResourceKind::StorageVirtualMachine,
        ResourceKind::OntapVolume,
        ResourceKind::OpenZfsVolume,
        ResourceKind::OpenZfsSnapshot,
    ];

    pub fn family(self) -> Family {
        match self {
            ResourceKind::LustreFileSystem
            | ResourceKind::WindowsFileSystem
            | ResourceKind::OntapFileSystem
            | ResourceKind::OpenZfsFileSystem => Family::FileSystem,
            ResourceKind::Backup => Family::Backup,
            ResourceKind::DataRepositoryAssociation => Family::DataRepositoryAssociation,
            ResourceKind::FileCache => Family::FileCache,
            ResourceKind::StorageVirtualMachine => Family::StorageVirtualMachine,
            ResourceKind::OntapVolume | ResourceKind::OpenZfsVolume => Family::Volume,
            ResourceKind::OpenZfsSnapshot => Family::Snapshot,
            ResourceKind::AdministrativeAction => Family::AdministrativeAction,
        }
    }

    /// Error code the remote API returns when a resource of this kind does not exist.
    pub fn not_found_code(self) -> &'static str {
        self.family().not_found_code()
    }

    /// Remote operation name, e.g. `CreateFileSystem` or `DescribeBackups`.
    pub fn operation_name(self, op: Operation) -> &'static str {
        self.family().operation_name(op)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::LustreFileSystem => "lustre_file_system",
            ResourceKind::WindowsFileSystem => "windows_file_system",
            ResourceKind::OntapFileSystem => "ontap_file_system",
            ResourceKind::OpenZfsFileSystem => "openzfs_file_system",
            ResourceKind::Backup => "backup",
            ResourceKind::DataRepositoryAssociation => "data_repository_association",
            ResourceKind::FileCache => "file_cache",
            ResourceKind::StorageVirtualMachine => "storage_virtual_machine",
            ResourceKind::OntapVolume => "ontap_volume",
            ResourceKind::OpenZfsVolume => "openzfs_volume",
            ResourceKind::OpenZfsSnapshot => "openzfs_snapshot",
            ResourceKind::AdministrativeAction => "administrative_action",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Family {
    fn not_found_code(self) -> &'static str {
        match self {
            Family::FileSystem => "FileSystemNotFound",
            Family::Backup => "BackupNotFound",
            Family::DataRepositoryAssociation => "DataRepositoryAssociationNotFound",
            Family::FileCache => "FileCacheNotFound",
            Family::StorageVirtualMachine => "StorageVirtualMachineNotFound",
            Family::Volume => "VolumeNotFound",
            Family::Snapshot => "SnapshotNotFound",
            // Actions are located through their owning file system.
            Family::AdministrativeAction => "FileSystemNotFound",
        }
    }

    fn operation_name(self, op: Operation) -> &'static str {
        use Operation::*;
        match (self, op) {
            (Family::FileSystem, Create) => "CreateFileSystem",
            (Family::FileSystem, Describe) => "DescribeFileSystems",
            (Family::FileSystem, Update) => "UpdateFileSystem",
            (Family::FileSystem, Delete) => "DeleteFileSystem",
            (Family::Backup, Create) => "CreateBackup",
            (Family::Backup, Describe) => "DescribeBackups",
            // Backups have no update call of their own; only tags change,
            // and no status wait follows.
            (Family::Backup, Update) => "TagResource",
            (Family::Backup, Delete) => "DeleteBackup",
            (Family::DataRepositoryAssociation, Create) => "CreateDataRepositoryAssociation",
            (Family::DataRepositoryAssociation, Describe) => "DescribeDataRepositoryAssociations",
            (Family::DataRepositoryAssociation, Update) => "UpdateDataRepositoryAssociation",
            (Family::DataRepositoryAssociation, Delete) => "DeleteDataRepositoryAssociation",
            (Family::FileCache, Create) => "CreateFileCache",
            (Family::FileCache, Describe) => "DescribeFileCaches",
            (Family::FileCache, Update) => "UpdateFileCache",
            (Family::FileCache, Delete) => "DeleteFileCache",
            (Family::StorageVirtualMachine, Create) => "CreateStorageVirtualMachine",
            (Family::StorageVirtualMachine, Describe) => "DescribeStorageVirtualMachines",
            (Family::StorageVirtualMachine, Update) => "UpdateStorageVirtualMachine",
            (Family::StorageVirtualMachine, Delete) => "DeleteStorageVirtualMachine",
            (Family::Volume, Create) => "CreateVolume",
            (Family::Volume, Describe) => "DescribeVolumes",
            (Family::Volume, Update) => "UpdateVolume",
            (Family::Volume, Delete) => "DeleteVolume",
            (Family::Snapshot, Create) => "CreateSnapshot",
            (Family::Snapshot, Describe) => "DescribeSnapshots",
            (Family::Snapshot, Update) => "UpdateSnapshot",
            (Family::Snapshot, Delete) => "DeleteSnapshot",
            (Family::AdministrativeAction, Describe) => "DescribeFileSystems",
            (Family::AdministrativeAction, _) => "UpdateFileSystem",
        }
    }
}
