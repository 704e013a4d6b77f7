//! Durable bidirectional mapping between local ids and remote object ids.
//!
//! The remote store is the source of truth for identity; mapping rows are a
//! cache of it. When a remote operation reports a new id for an entity whose
//! local id is known, the row is repointed in place so the local id and the
//! external uuid survive.

use std::sync::Arc;

use cmis_repository_core::{
    HostFolderKind, HostFolders, IdCounter, IdentifierMapping, LocalId, MappingStore,
    RemoteDocument, RemoteObject, RemoteSession, StoreError,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::classifier::ExceptionClassifier;
use crate::config::DeleteDepth;
use crate::error::{EntityKind, RepositoryError, Result};

/// Identifier map of one repository.
pub struct IdentifierMap {
    repository_id: i64,
    delete_depth: DeleteDepth,
    store: Arc<dyn MappingStore>,
    counter: Arc<dyn IdCounter>,
    host_folders: Arc<dyn HostFolders>,
    classifier: Arc<ExceptionClassifier>,
}

impl IdentifierMap {
    pub fn new(
        repository_id: i64,
        delete_depth: DeleteDepth,
        store: Arc<dyn MappingStore>,
        counter: Arc<dyn IdCounter>,
        host_folders: Arc<dyn HostFolders>,
        classifier: Arc<ExceptionClassifier>,
    ) -> Self {
        Self {
            repository_id,
            delete_depth,
            store,
            counter,
            host_folders,
            classifier,
        }
    }

    pub fn repository_id(&self) -> i64 {
        self.repository_id
    }

    pub fn delete_depth(&self) -> DeleteDepth {
        self.delete_depth
    }

    /// Remote id of a file entry or file version.
    pub async fn resolve_remote_id(&self, local_id: LocalId, entity: EntityKind) -> Result<String> {
        match self.store.fetch_by_local_id(self.repository_id, local_id).await? {
            Some(mapping) => Ok(mapping.remote_id),
            None => Err(RepositoryError::not_found(
                entity,
                format!("{{{}={}}}", id_label(entity), local_id),
            )),
        }
    }

    /// Remote id of a folder, bootstrapping the mapping of a mount point on first use.
    #[instrument(skip(self, session), level = "debug")]
    pub async fn resolve_folder_remote_id(
        &self,
        session: &dyn RemoteSession,
        local_id: LocalId,
    ) -> Result<String> {
        if let Some(mapping) = self.store.fetch_by_local_id(self.repository_id, local_id).await? {
            return Ok(mapping.remote_id);
        }

        match self.host_folders.lookup(local_id).await? {
            None => Err(RepositoryError::not_found(
                EntityKind::Folder,
                format!("{{folderId={}}}", local_id),
            )),
            Some(HostFolderKind::Regular) => Err(RepositoryError::fault(format!(
                "Repository {} should not be used for folder ID {}",
                self.repository_id, local_id
            ))),
            Some(HostFolderKind::MountPoint) => self.bootstrap_mount_point(session, local_id).await,
        }
    }

    /// Bind a mount point's local id to the remote root folder.
    async fn bootstrap_mount_point(
        &self,
        session: &dyn RemoteSession,
        local_id: LocalId,
    ) -> Result<String> {
        let info = session
            .repository_info()
            .await
            .map_err(|e| self.classifier.to_error(e))?;
        let root_folder_id = info.root_folder_id;

        if let Some(existing) = self
            .store
            .fetch_by_remote_id(self.repository_id, &root_folder_id)
            .await?
        {
            debug!(
                "Root folder {} already mapped to local id {}",
                root_folder_id, existing.local_id
            );
            return Ok(existing.remote_id);
        }

        let mapping = IdentifierMapping {
            repository_id: self.repository_id,
            local_id,
            remote_id: root_folder_id.clone(),
            uuid: Uuid::new_v4().to_string(),
        };

        match self.store.create(mapping).await {
            Ok(()) => {
                info!(
                    "Mounted remote root folder {} at folder {} (repository {})",
                    root_folder_id, local_id, self.repository_id
                );
                Ok(root_folder_id)
            }
            Err(StoreError::Duplicate(_)) => {
                // Lost a race against a concurrent bootstrap.
                self.resolve_remote_id(local_id, EntityKind::Folder).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Local id and external uuid of a remote object, if it is already known.
    pub async fn resolve_local_id(&self, remote_id: &str) -> Result<Option<(LocalId, String)>> {
        Ok(self
            .store
            .fetch_by_remote_id(self.repository_id, remote_id)
            .await?
            .map(|m| (m.local_id, m.uuid)))
    }

    /// Local id and external uuid of a remote object, minting them when it is new.
    pub async fn resolve_or_mint(&self, remote_id: &str) -> Result<(LocalId, String)> {
        if let Some(ids) = self.resolve_local_id(remote_id).await? {
            return Ok(ids);
        }

        let local_id = self.counter.next_id().await?;
        let uuid = Uuid::new_v4().to_string();

        let mapping = IdentifierMapping {
            repository_id: self.repository_id,
            local_id,
            remote_id: remote_id.to_string(),
            uuid: uuid.clone(),
        };

        match self.store.create(mapping).await {
            Ok(()) => {
                debug!("Minted local id {} for remote object {}", local_id, remote_id);
                Ok((local_id, uuid))
            }
            Err(StoreError::Duplicate(_)) => self
                .resolve_local_id(remote_id)
                .await?
                .ok_or_else(|| {
                    RepositoryError::fault(format!(
                        "Unable to map remote object {} in repository {}",
                        remote_id, self.repository_id
                    ))
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Full mapping row for an external uuid.
    pub async fn find_by_uuid(&self, uuid: &str) -> Result<Option<IdentifierMapping>> {
        Ok(self.store.fetch_by_uuid(self.repository_id, uuid).await?)
    }

    /// Point an existing row at a new remote id. No-op when unchanged.
    #[instrument(skip(self), level = "debug")]
    pub async fn repoint_remote_id(&self, local_id: LocalId, new_remote_id: &str) -> Result<()> {
        let mapping = self
            .store
            .fetch_by_local_id(self.repository_id, local_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::not_found(EntityKind::Mapping, format!("{{localId={}}}", local_id))
            })?;

        if mapping.remote_id == new_remote_id {
            return Ok(());
        }

        match self
            .store
            .update_remote_id(self.repository_id, local_id, new_remote_id)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                // A listing minted a row for the new id first; the repointed row wins.
                warn!(
                    "Dropping stale mapping of {} before repointing local id {}",
                    new_remote_id, local_id
                );
                self.delete_mapping_by_remote_id(new_remote_id).await?;
                self.store
                    .update_remote_id(self.repository_id, local_id, new_remote_id)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Repointed local id {} from {} to {}",
            local_id, mapping.remote_id, new_remote_id
        );
        Ok(())
    }

    /// Remove the row of a local id. Missing rows are ignored.
    pub async fn delete_mapping(&self, local_id: LocalId) -> Result<()> {
        match self.store.remove_by_local_id(self.repository_id, local_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the row of a remote id. Missing rows are ignored.
    pub async fn delete_mapping_by_remote_id(&self, remote_id: &str) -> Result<()> {
        match self.store.remove_by_remote_id(self.repository_id, remote_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                debug!("No mapping left for remote object {}", remote_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remote ids whose rows go away when a document is deleted, per delete depth.
    ///
    /// Collected before the remote deletion, since the versions cannot be
    /// enumerated afterwards.
    pub async fn collect_file_entry_rows(
        &self,
        session: &dyn RemoteSession,
        document: &RemoteDocument,
    ) -> Result<Vec<String>> {
        if self.delete_depth == DeleteDepth::None {
            return Ok(Vec::new());
        }

        self.document_rows(session, &document.version_series_id).await
    }

    /// Remote ids whose rows go away when a folder is deleted, per delete depth.
    pub async fn collect_folder_rows(
        &self,
        session: &dyn RemoteSession,
        folder_remote_id: &str,
    ) -> Result<Vec<String>> {
        match self.delete_depth {
            DeleteDepth::None => Ok(Vec::new()),
            DeleteDepth::Shallow => Ok(vec![folder_remote_id.to_string()]),
            DeleteDepth::Deep => {
                let mut rows = vec![folder_remote_id.to_string()];
                let mut pending = vec![folder_remote_id.to_string()];

                while let Some(folder_id) = pending.pop() {
                    let children = session
                        .get_children(&folder_id)
                        .await
                        .map_err(|e| self.classifier.to_error(e))?;

                    for child in children {
                        match child {
                            RemoteObject::Folder(folder) => {
                                rows.push(folder.id.clone());
                                pending.push(folder.id);
                            }
                            RemoteObject::Document(document) => {
                                rows.extend(
                                    self.document_rows(session, &document.version_series_id)
                                        .await?,
                                );
                            }
                        }
                    }
                }

                Ok(rows)
            }
        }
    }

    /// Remove the rows collected by `collect_*_rows`. Missing rows are ignored.
    pub async fn purge(&self, remote_ids: &[String]) -> Result<()> {
        for remote_id in remote_ids {
            self.delete_mapping_by_remote_id(remote_id).await?;
        }

        if !remote_ids.is_empty() {
            debug!(
                "Purged {} mapping rows (delete depth {})",
                remote_ids.len(),
                self.delete_depth
            );
        }
        Ok(())
    }

    /// Version ids plus the version series id of a document.
    async fn document_rows(
        &self,
        session: &dyn RemoteSession,
        version_series_id: &str,
    ) -> Result<Vec<String>> {
        let mut rows = match session.get_all_versions(version_series_id).await {
            Ok(versions) => versions.into_iter().map(|v| v.id).collect::<Vec<_>>(),
            Err(e) => {
                warn!(
                    "Unable to enumerate versions of {}, purging series row only: {}",
                    version_series_id, e
                );
                Vec::new()
            }
        };
        rows.push(version_series_id.to_string());
        Ok(rows)
    }
}

fn id_label(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Folder => "folderId",
        EntityKind::FileEntry => "fileEntryId",
        EntityKind::FileVersion => "fileVersionId",
        EntityKind::Mapping | EntityKind::RemoteObject => "localId",
    }
}
