use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::LocalId;

/// One row of the identifier map.
///
/// Invariants held by every `MappingStore`:
/// - exactly one row per (repository_id, local_id)
/// - exactly one row per (repository_id, remote_id) at any instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    /// Owning repository
    pub repository_id: i64,
    /// Durable host identifier, never reused
    pub local_id: LocalId,
    /// Current remote object id (folder id or version series id)
    pub remote_id: String,
    /// Globally unique external id used for cross-repository references
    pub uuid: String,
}

/// Durable key-value storage of mapping rows, keyed both ways.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Create a row. Fails with `StoreError::Duplicate` if either key is taken.
    async fn create(&self, mapping: IdentifierMapping) -> Result<(), StoreError>;

    /// Point lookup by local id.
    async fn fetch_by_local_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<Option<IdentifierMapping>, StoreError>;

    /// Point lookup by remote id.
    async fn fetch_by_remote_id(
        &self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError>;

    /// Point lookup by external uuid.
    async fn fetch_by_uuid(
        &self,
        repository_id: i64,
        uuid: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError>;

    /// Overwrite the remote id of an existing row in place.
    ///
    /// Fails with `StoreError::NotFound` if the row does not exist and with
    /// `StoreError::Duplicate` if another local id already owns `remote_id`.
    async fn update_remote_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
        remote_id: &str,
    ) -> Result<(), StoreError>;

    /// Remove a row by local id. Fails with `StoreError::NotFound` if absent.
    async fn remove_by_local_id(&self, repository_id: i64, local_id: LocalId)
        -> Result<(), StoreError>;

    /// Remove a row by remote id. Fails with `StoreError::NotFound` if absent.
    async fn remove_by_remote_id(&self, repository_id: i64, remote_id: &str)
        -> Result<(), StoreError>;
}

/// Durable counter handing out local ids.
#[async_trait]
pub trait IdCounter: Send + Sync {
    /// Next unique id. Never returns the same value twice.
    async fn next_id(&self) -> Result<LocalId, StoreError>;
}

/// Kind of a host-side folder that has no mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFolderKind {
    /// Attachment point of the remote repository's root folder
    MountPoint,
    /// Host folder that is not backed by this repository
    Regular,
}

/// The host's own folder table, consulted only for unmapped folder ids.
#[async_trait]
pub trait HostFolders: Send + Sync {
    /// Look up a host folder. `None` if the host has no such folder.
    async fn lookup(&self, folder_id: LocalId) -> Result<Option<HostFolderKind>, StoreError>;
}
