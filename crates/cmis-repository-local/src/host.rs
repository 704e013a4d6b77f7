use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use cmis_repository_core::{HostFolderKind, HostFolders, IdCounter, LocalId, StoreError};

/// Process-local id counter.
#[derive(Debug)]
pub struct AtomicIdCounter {
    next: AtomicI64,
}

impl AtomicIdCounter {
    pub fn starting_at(first_id: LocalId) -> Self {
        Self {
            next: AtomicI64::new(first_id),
        }
    }
}

impl Default for AtomicIdCounter {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[async_trait]
impl IdCounter for AtomicIdCounter {
    async fn next_id(&self) -> Result<LocalId, StoreError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Fixed host folder table.
#[derive(Debug, Clone, Default)]
pub struct StaticHostFolders {
    folders: HashMap<LocalId, HostFolderKind>,
}

impl StaticHostFolders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a host folder as the attachment point of the remote root.
    pub fn with_mount_point(mut self, folder_id: LocalId) -> Self {
        self.folders.insert(folder_id, HostFolderKind::MountPoint);
        self
    }

    /// Register a host folder that is not backed by the remote repository.
    pub fn with_regular(mut self, folder_id: LocalId) -> Self {
        self.folders.insert(folder_id, HostFolderKind::Regular);
        self
    }
}

#[async_trait]
impl HostFolders for StaticHostFolders {
    async fn lookup(&self, folder_id: LocalId) -> Result<Option<HostFolderKind>, StoreError> {
        Ok(self.folders.get(&folder_id).copied())
    }
}
