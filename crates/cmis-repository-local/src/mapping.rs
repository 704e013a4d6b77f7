//! Mapping stores: in-memory, and a JSON file that survives restarts.
//!
//! File layout:
//! ```text
//! {
//!   "next_id": 101,
//!   "mappings": [
//!     { "repository_id": 1, "local_id": 100, "remote_id": "f-3", "uuid": "..." }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use cmis_repository_core::{IdCounter, IdentifierMapping, LocalId, MappingStore, StoreError};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Rows indexed by local id, remote id and uuid.
#[derive(Debug, Clone, Default)]
struct MappingTable {
    by_local: HashMap<(i64, LocalId), IdentifierMapping>,
    by_remote: HashMap<(i64, String), LocalId>,
    by_uuid: HashMap<(i64, String), LocalId>,
}

impl MappingTable {
    fn from_rows(rows: Vec<IdentifierMapping>) -> Result<Self, StoreError> {
        let mut table = Self::default();
        for row in rows {
            table.create(row)?;
        }
        Ok(table)
    }

    fn rows(&self) -> Vec<IdentifierMapping> {
        let mut rows: Vec<_> = self.by_local.values().cloned().collect();
        rows.sort_by_key(|m| (m.repository_id, m.local_id));
        rows
    }

    fn len(&self) -> usize {
        self.by_local.len()
    }

    fn create(&mut self, mapping: IdentifierMapping) -> Result<(), StoreError> {
        let repository_id = mapping.repository_id;

        if self.by_local.contains_key(&(repository_id, mapping.local_id)) {
            return Err(StoreError::Duplicate(format!("localId={}", mapping.local_id)));
        }
        if self
            .by_remote
            .contains_key(&(repository_id, mapping.remote_id.clone()))
        {
            return Err(StoreError::Duplicate(format!("remoteId={}", mapping.remote_id)));
        }

        self.by_remote
            .insert((repository_id, mapping.remote_id.clone()), mapping.local_id);
        self.by_uuid
            .insert((repository_id, mapping.uuid.clone()), mapping.local_id);
        self.by_local.insert((repository_id, mapping.local_id), mapping);
        Ok(())
    }

    fn by_local_id(&self, repository_id: i64, local_id: LocalId) -> Option<IdentifierMapping> {
        self.by_local.get(&(repository_id, local_id)).cloned()
    }

    fn by_remote_id(&self, repository_id: i64, remote_id: &str) -> Option<IdentifierMapping> {
        self.by_remote
            .get(&(repository_id, remote_id.to_string()))
            .and_then(|local_id| self.by_local_id(repository_id, *local_id))
    }

    fn by_uuid(&self, repository_id: i64, uuid: &str) -> Option<IdentifierMapping> {
        self.by_uuid
            .get(&(repository_id, uuid.to_string()))
            .and_then(|local_id| self.by_local_id(repository_id, *local_id))
    }

    fn update_remote_id(
        &mut self,
        repository_id: i64,
        local_id: LocalId,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        if let Some(owner) = self.by_remote.get(&(repository_id, remote_id.to_string())) {
            if *owner != local_id {
                return Err(StoreError::Duplicate(format!("remoteId={}", remote_id)));
            }
        }

        let mapping = self
            .by_local
            .get_mut(&(repository_id, local_id))
            .ok_or_else(|| StoreError::NotFound(format!("localId={}", local_id)))?;

        let previous = std::mem::replace(&mut mapping.remote_id, remote_id.to_string());
        self.by_remote.remove(&(repository_id, previous));
        self.by_remote
            .insert((repository_id, remote_id.to_string()), local_id);
        Ok(())
    }

    fn remove_by_local_id(
        &mut self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<(), StoreError> {
        let mapping = self
            .by_local
            .remove(&(repository_id, local_id))
            .ok_or_else(|| StoreError::NotFound(format!("localId={}", local_id)))?;

        self.by_remote.remove(&(repository_id, mapping.remote_id));
        self.by_uuid.remove(&(repository_id, mapping.uuid));
        Ok(())
    }

    fn remove_by_remote_id(
        &mut self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        let local_id = self
            .by_remote
            .get(&(repository_id, remote_id.to_string()))
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("remoteId={}", remote_id)))?;
        self.remove_by_local_id(repository_id, local_id)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Mapping store held in memory, for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    table: RwLock<MappingTable>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().expect("mapping table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every row, ordered by repository and local id.
    pub fn rows(&self) -> Vec<IdentifierMapping> {
        self.table.read().expect("mapping table poisoned").rows()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn create(&self, mapping: IdentifierMapping) -> Result<(), StoreError> {
        self.table.write().expect("mapping table poisoned").create(mapping)
    }

    async fn fetch_by_local_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self
            .table
            .read()
            .expect("mapping table poisoned")
            .by_local_id(repository_id, local_id))
    }

    async fn fetch_by_remote_id(
        &self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self
            .table
            .read()
            .expect("mapping table poisoned")
            .by_remote_id(repository_id, remote_id))
    }

    async fn fetch_by_uuid(
        &self,
        repository_id: i64,
        uuid: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self
            .table
            .read()
            .expect("mapping table poisoned")
            .by_uuid(repository_id, uuid))
    }

    async fn update_remote_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        self.table
            .write()
            .expect("mapping table poisoned")
            .update_remote_id(repository_id, local_id, remote_id)
    }

    async fn remove_by_local_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<(), StoreError> {
        self.table
            .write()
            .expect("mapping table poisoned")
            .remove_by_local_id(repository_id, local_id)
    }

    async fn remove_by_remote_id(
        &self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        self.table
            .write()
            .expect("mapping table poisoned")
            .remove_by_remote_id(repository_id, remote_id)
    }
}

// =============================================================================
// JSON file store
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct MappingFile {
    next_id: LocalId,
    #[serde(default)]
    mappings: Vec<IdentifierMapping>,
}

#[derive(Debug)]
struct FileState {
    next_id: LocalId,
    table: MappingTable,
}

/// Mapping store persisted to a JSON file, also serving as the durable id counter.
///
/// Every change is written to a temp file and renamed over the previous one.
#[derive(Debug)]
pub struct JsonFileMappingStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl JsonFileMappingStore {
    /// Open the store at `path`, creating an empty one if the file is missing.
    /// Fresh ids start at `first_id`.
    pub async fn open(path: impl AsRef<Path>, first_id: LocalId) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let file: MappingFile = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?;
                debug!(
                    "Loaded {} mappings from {}",
                    file.mappings.len(),
                    path.display()
                );
                FileState {
                    next_id: file.next_id.max(first_id),
                    table: MappingTable::from_rows(file.mappings)?,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileState {
                next_id: first_id,
                table: MappingTable::default(),
            },
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.table.len()
    }

    async fn persist(&self, next_id: LocalId, table: &MappingTable) -> Result<(), StoreError> {
        let file = MappingFile {
            next_id,
            mappings: table.rows(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Io(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json).await.map_err(|e| {
            StoreError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to rename temp file to {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Apply a change to a copy of the table, persist it, then commit it.
    async fn modify<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut MappingTable) -> Result<(), StoreError>,
    {
        let mut state = self.state.lock().await;
        let mut table = state.table.clone();
        change(&mut table)?;
        self.persist(state.next_id, &table).await?;
        state.table = table;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for JsonFileMappingStore {
    #[instrument(skip(self), level = "debug")]
    async fn create(&self, mapping: IdentifierMapping) -> Result<(), StoreError> {
        self.modify(|table| table.create(mapping)).await
    }

    async fn fetch_by_local_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self.state.lock().await.table.by_local_id(repository_id, local_id))
    }

    async fn fetch_by_remote_id(
        &self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self.state.lock().await.table.by_remote_id(repository_id, remote_id))
    }

    async fn fetch_by_uuid(
        &self,
        repository_id: i64,
        uuid: &str,
    ) -> Result<Option<IdentifierMapping>, StoreError> {
        Ok(self.state.lock().await.table.by_uuid(repository_id, uuid))
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_remote_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        self.modify(|table| table.update_remote_id(repository_id, local_id, remote_id))
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_by_local_id(
        &self,
        repository_id: i64,
        local_id: LocalId,
    ) -> Result<(), StoreError> {
        self.modify(|table| table.remove_by_local_id(repository_id, local_id))
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_by_remote_id(
        &self,
        repository_id: i64,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        self.modify(|table| table.remove_by_remote_id(repository_id, remote_id))
            .await
    }
}

#[async_trait]
impl IdCounter for JsonFileMappingStore {
    async fn next_id(&self) -> Result<LocalId, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        self.persist(id + 1, &state.table).await?;
        state.next_id = id + 1;
        Ok(id)
    }
}
