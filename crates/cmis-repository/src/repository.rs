//! Public entity operations over a CMIS remote store.
//!
//! Every operation resolves local ids through the identifier map, runs its
//! remote calls on the caller's cached session, and converts remote results
//! back into [`Folder`] / [`FileEntry`] shapes, repointing mappings whose
//! remote id changed underneath. Remote faults are classified once, where
//! they are raised.

use std::sync::Arc;

use cmis_repository_core::{
    ConnectionFactory, ContentStream, HostFolders, IdCounter, LocalId, MappingStore, NameQuery,
    Properties, QueryObjectType, RemoteDocument, RemoteError, RemoteFolder, RemoteObject,
    RemoteSession, RepositoryInfo, PROPERTY_OBJECT_ID,
};
use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use crate::checkout::{CheckoutCoordinator, DocumentChange};
use crate::classifier::ExceptionClassifier;
use crate::config::RepositoryConfig;
use crate::entity::{FileEntry, FileVersion, Folder, RepositoryEntity};
use crate::error::{EntityKind, RepositoryError, Result};
use crate::identifier_map::IdentifierMap;
use crate::listing_cache::{arrange, FolderListing, OrderBy, Page, RequestScope};
use crate::session_cache::{SessionCache, UserContext};

/// A remote CMIS repository exposed under stable local ids.
pub struct CmisRepository {
    config: RepositoryConfig,
    factory: Arc<dyn ConnectionFactory>,
    sessions: SessionCache,
    identifiers: IdentifierMap,
    classifier: Arc<ExceptionClassifier>,
}

impl CmisRepository {
    pub fn new(
        config: RepositoryConfig,
        factory: Arc<dyn ConnectionFactory>,
        store: Arc<dyn MappingStore>,
        counter: Arc<dyn IdCounter>,
        host_folders: Arc<dyn HostFolders>,
    ) -> Self {
        let classifier = Arc::new(ExceptionClassifier::new(Arc::clone(&factory)));
        let identifiers = IdentifierMap::new(
            config.repository_id,
            config.delete_depth,
            store,
            counter,
            host_folders,
            Arc::clone(&classifier),
        );

        Self {
            config,
            sessions: SessionCache::new(Arc::clone(&factory)),
            factory,
            identifiers,
            classifier,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn repository_id(&self) -> i64 {
        self.config.repository_id
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn identifiers(&self) -> &IdentifierMap {
        &self.identifiers
    }

    /// Start a user context. Its session is released when the context drops.
    pub fn open_context(&self, label: impl Into<String>) -> UserContext {
        self.sessions.open_context(label)
    }

    /// Start one inbound call chain for a context.
    pub fn begin_request(&self, context: &UserContext) -> RequestScope {
        RequestScope::new(context.clone())
    }

    pub fn supported_configurations(&self) -> Vec<String> {
        self.factory.supported_configurations()
    }

    pub fn supported_parameters(&self) -> Vec<Vec<String>> {
        self.factory.supported_parameters()
    }

    // =========================================================================
    // Repository
    // =========================================================================

    /// Open a session and read the remote repository information.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn init_repository(&self, scope: &RequestScope) -> Result<RepositoryInfo> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let info = session
                .repository_info()
                .await
                .map_err(|e| self.remote_err(e))?;

            info!(
                "Connected repository {} to remote repository {} ({})",
                self.repository_id(),
                info.id,
                info.name
            );
            Ok(info)
        }
        .await;

        let result = result.map_err(|e| match e {
            RepositoryError::Fault { .. } => RepositoryError::fault_with(
                format!(
                    "Unable to initialize CMIS session for repository {}",
                    self.repository_id()
                ),
                e,
            ),
            other => other,
        });
        self.settle(scope, result)
    }

    // =========================================================================
    // Folders
    // =========================================================================

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn add_folder(
        &self,
        scope: &RequestScope,
        parent_folder_id: LocalId,
        title: &str,
    ) -> Result<Folder> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let parent_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), parent_folder_id)
                .await?;

            self.validate_title(session.as_ref(), &parent_remote_id, title).await?;

            let folder = session
                .create_folder(&parent_remote_id, title)
                .await
                .map_err(|e| self.remote_err(e))?;
            scope.listings().evict(parent_folder_id);

            self.to_folder(folder, Some(parent_folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_folder(&self, scope: &RequestScope, folder_id: LocalId) -> Result<Folder> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder = self.fetch_folder(session.as_ref(), folder_id).await?;
            let parent_folder_id = self.parent_of_folder(&folder).await?;
            self.to_folder(folder, parent_folder_id).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_folder_by_title(
        &self,
        scope: &RequestScope,
        parent_folder_id: LocalId,
        title: &str,
    ) -> Result<Folder> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let parent_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), parent_folder_id)
                .await?;

            let object_id = self
                .find_object_id(session.as_ref(), QueryObjectType::Folder, title, &parent_remote_id)
                .await?
                .ok_or_else(|| {
                    RepositoryError::not_found(
                        EntityKind::Folder,
                        format!("{{parentFolderId={}, title={}}}", parent_folder_id, title),
                    )
                })?;

            let folder = session
                .get_object(&object_id)
                .await
                .map_err(|e| self.remote_err(e))?
                .into_folder()
                .ok_or_else(|| {
                    RepositoryError::not_found(
                        EntityKind::Folder,
                        format!("{{objectId={}}}", object_id),
                    )
                })?;

            self.to_folder(folder, Some(parent_folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Rename a folder. An empty or unchanged title leaves it as is.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn update_folder(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        title: &str,
    ) -> Result<Folder> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder = self.fetch_folder(session.as_ref(), folder_id).await?;
            let parent_folder_id = self.parent_of_folder(&folder).await?;

            if title.is_empty() || title == folder.name {
                return self.to_folder(folder, parent_folder_id).await;
            }

            if let Some(parent_remote_id) = &folder.parent_id {
                self.validate_title(session.as_ref(), parent_remote_id, title).await?;
            }

            let updated = session
                .update_properties(&folder.id, &Properties::with_name(title))
                .await
                .map_err(|e| self.remote_err(e))?
                .into_folder()
                .ok_or_else(|| {
                    RepositoryError::fault(format!("Folder {} changed type on update", folder.id))
                })?;

            if updated.id != folder.id {
                self.identifiers.repoint_remote_id(folder_id, &updated.id).await?;
            }
            if let Some(parent_folder_id) = parent_folder_id {
                scope.listings().evict(parent_folder_id);
            }

            self.to_folder(updated, parent_folder_id).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn move_folder(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        new_parent_folder_id: LocalId,
    ) -> Result<Folder> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder = self.fetch_folder(session.as_ref(), folder_id).await?;

            let Some(source_remote_id) = folder.parent_id.clone() else {
                return Err(RepositoryError::fault("Cannot move CMIS root folder"));
            };

            let target_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), new_parent_folder_id)
                .await?;

            if target_remote_id == source_remote_id || target_remote_id == folder.id {
                debug!("Folder {} already in place", folder_id);
                let parent_folder_id = self.parent_of_folder(&folder).await?;
                return self.to_folder(folder, parent_folder_id).await;
            }

            self.validate_title(session.as_ref(), &target_remote_id, &folder.name)
                .await?;

            let moved = session
                .move_object(&folder.id, &source_remote_id, &target_remote_id)
                .await
                .map_err(|e| self.remote_err(e))?
                .into_folder()
                .ok_or_else(|| {
                    RepositoryError::fault(format!("Folder {} changed type on move", folder.id))
                })?;

            if moved.id != folder.id {
                self.identifiers.repoint_remote_id(folder_id, &moved.id).await?;
            }

            if let Some((source_folder_id, _)) =
                self.identifiers.resolve_local_id(&source_remote_id).await?
            {
                scope.listings().evict(source_folder_id);
            }
            scope.listings().evict(new_parent_folder_id);

            self.to_folder(moved, Some(new_parent_folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Delete a folder and its contents, purging mappings per delete depth.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn delete_folder(&self, scope: &RequestScope, folder_id: LocalId) -> Result<()> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder = self.fetch_folder(session.as_ref(), folder_id).await?;

            let rows = self
                .identifiers
                .collect_folder_rows(session.as_ref(), &folder.id)
                .await?;

            session
                .delete_tree(&folder.id)
                .await
                .map_err(|e| self.remote_err(e))?;

            self.identifiers.purge(&rows).await?;

            scope.listings().evict(folder_id);
            if let Some(parent_folder_id) = self.parent_of_folder(&folder).await? {
                scope.listings().evict(parent_folder_id);
            }

            info!("Deleted folder {} ({})", folder_id, folder.id);
            Ok(())
        }
        .await;
        self.settle(scope, result)
    }

    // =========================================================================
    // File entries
    // =========================================================================

    #[instrument(skip(self, scope, content), level = "debug")]
    pub async fn add_file_entry(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        title: &str,
        content: ContentStream,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), folder_id)
                .await?;

            self.validate_title(session.as_ref(), &folder_remote_id, title).await?;

            let document = session
                .create_document(&folder_remote_id, title, content)
                .await
                .map_err(|e| self.remote_err(e))?;
            scope.listings().evict(folder_id);

            self.to_file_entry(document, Some(folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Copy the latest version of a file entry into another folder.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn copy_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        dest_folder_id: LocalId,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let document = self.latest_document(session.as_ref(), file_entry_id).await?;
            let dest_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), dest_folder_id)
                .await?;

            self.validate_title(session.as_ref(), &dest_remote_id, &document.name)
                .await?;

            let copy = session
                .copy_document(&document.id, &dest_remote_id)
                .await
                .map_err(|e| self.remote_err(e))?;
            scope.listings().evict(dest_folder_id);

            self.to_file_entry(copy, Some(dest_folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            self.fetch_file_entry(session.as_ref(), file_entry_id).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_entry_by_title(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        title: &str,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let folder_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), folder_id)
                .await?;

            let object_id = self
                .find_object_id(
                    session.as_ref(),
                    QueryObjectType::Document,
                    title,
                    &folder_remote_id,
                )
                .await?
                .ok_or_else(|| {
                    RepositoryError::not_found(
                        EntityKind::FileEntry,
                        format!("{{folderId={}, title={}}}", folder_id, title),
                    )
                })?;

            let document = session
                .get_object(&object_id)
                .await
                .map_err(|e| self.remote_err(e))?
                .into_document()
                .ok_or_else(|| {
                    RepositoryError::not_found(
                        EntityKind::FileEntry,
                        format!("{{objectId={}}}", object_id),
                    )
                })?;

            self.to_file_entry(document, Some(folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_entry_by_uuid(
        &self,
        scope: &RequestScope,
        uuid: &str,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let mapping = self.identifiers.find_by_uuid(uuid).await?.ok_or_else(|| {
                RepositoryError::not_found(EntityKind::FileEntry, format!("{{uuid={}}}", uuid))
            })?;

            let session = self.session(scope).await?;
            self.fetch_file_entry(session.as_ref(), mapping.local_id).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Content of the latest version, or of the version with the given label.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_content_stream(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        version: Option<&str>,
    ) -> Result<ContentStream> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let document = match version {
                None => self.latest_document(session.as_ref(), file_entry_id).await?,
                Some(version) => {
                    self.versions(session.as_ref(), file_entry_id)
                        .await?
                        .into_iter()
                        .find(|v| v.effective_version_label() == version)
                        .ok_or_else(|| {
                            RepositoryError::not_found(
                                EntityKind::FileVersion,
                                format!("{{fileEntryId={}, version={}}}", file_entry_id, version),
                            )
                        })?
                }
            };

            session
                .get_content_stream(&document.id)
                .await
                .map_err(|e| self.remote_err(e))
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope, change), level = "debug")]
    pub async fn update_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        change: DocumentChange,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let remote_id = self
                .identifiers
                .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
                .await?;
            let document = self.latest_document(session.as_ref(), file_entry_id).await?;
            let parent_remote_id = self.parent_remote_id(session.as_ref(), &document.id).await?;

            let renames = change
                .title
                .as_deref()
                .is_some_and(|title| !title.is_empty() && title != document.name);
            if renames {
                if let (Some(parent_remote_id), Some(title)) = (&parent_remote_id, &change.title) {
                    self.validate_title(session.as_ref(), parent_remote_id, title).await?;
                }
            }

            let coordinator = CheckoutCoordinator::new(&session, &self.classifier);
            let updated = coordinator.update(&document.id, change).await?;

            self.finish_document_change(scope, file_entry_id, &remote_id, updated, parent_remote_id)
                .await
        }
        .await;
        self.settle(scope, result)
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn move_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        new_folder_id: LocalId,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let remote_id = self
                .identifiers
                .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
                .await?;
            let document = self.latest_document(session.as_ref(), file_entry_id).await?;
            let target_remote_id = self
                .identifiers
                .resolve_folder_remote_id(session.as_ref(), new_folder_id)
                .await?;

            let source_remote_id = self
                .parent_remote_id(session.as_ref(), &document.id)
                .await?
                .ok_or_else(|| {
                    RepositoryError::fault(format!(
                        "Document {} is not filed in a folder",
                        document.id
                    ))
                })?;

            if source_remote_id == target_remote_id {
                debug!("File entry {} already in folder {}", file_entry_id, new_folder_id);
                return self.to_file_entry(document, Some(new_folder_id)).await;
            }

            self.validate_title(session.as_ref(), &target_remote_id, &document.name)
                .await?;

            let moved = session
                .move_object(&document.id, &source_remote_id, &target_remote_id)
                .await
                .map_err(|e| self.remote_err(e))?
                .into_document()
                .ok_or_else(|| {
                    RepositoryError::fault(format!("Document {} changed type on move", document.id))
                })?;

            if moved.version_series_id != remote_id {
                self.identifiers
                    .repoint_remote_id(file_entry_id, &moved.version_series_id)
                    .await?;
            }

            if let Some((source_folder_id, _)) =
                self.identifiers.resolve_local_id(&source_remote_id).await?
            {
                scope.listings().evict(source_folder_id);
            }
            scope.listings().evict(new_folder_id);

            self.to_file_entry(moved, Some(new_folder_id)).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Delete every version of a file entry, purging mappings per delete depth.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn delete_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
    ) -> Result<()> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let document = self.latest_document(session.as_ref(), file_entry_id).await?;
            let parent_remote_id = self.parent_remote_id(session.as_ref(), &document.id).await?;

            let rows = self
                .identifiers
                .collect_file_entry_rows(session.as_ref(), &document)
                .await?;

            session
                .delete_all_versions(&document.id)
                .await
                .map_err(|e| self.remote_err(e))?;

            self.identifiers.purge(&rows).await?;

            if let Some(parent_remote_id) = parent_remote_id {
                if let Some((folder_id, _)) =
                    self.identifiers.resolve_local_id(&parent_remote_id).await?
                {
                    scope.listings().evict(folder_id);
                }
            }

            info!("Deleted file entry {} ({})", file_entry_id, document.version_series_id);
            Ok(())
        }
        .await;
        self.settle(scope, result)
    }

    /// Make a historical version the latest, as a new major version.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn revert_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        version: &str,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let remote_id = self
                .identifiers
                .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
                .await?;

            let coordinator = CheckoutCoordinator::new(&session, &self.classifier);
            let reverted = coordinator.revert(&remote_id, version).await?;
            let parent_remote_id = self.parent_remote_id(session.as_ref(), &reverted.id).await?;

            self.finish_document_change(
                scope,
                file_entry_id,
                &remote_id,
                reverted,
                parent_remote_id,
            )
            .await
        }
        .await;
        self.settle(scope, result)
    }

    // =========================================================================
    // File versions
    // =========================================================================

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_version(
        &self,
        scope: &RequestScope,
        file_version_id: LocalId,
    ) -> Result<FileVersion> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let remote_id = self
                .identifiers
                .resolve_remote_id(file_version_id, EntityKind::FileVersion)
                .await?;

            let document = session
                .get_object(&remote_id)
                .await
                .map_err(|e| self.remote_err(e))
                .map_err(missing(
                    EntityKind::FileVersion,
                    format!("{{fileVersionId={}}}", file_version_id),
                ))?
                .into_document()
                .ok_or_else(|| {
                    RepositoryError::not_found(
                        EntityKind::FileVersion,
                        format!("{{fileVersionId={}}}", file_version_id),
                    )
                })?;

            let file_entry_id = self
                .identifiers
                .resolve_local_id(&document.version_series_id)
                .await?
                .map(|(id, _)| id);

            Ok(FileVersion {
                file_version_id,
                file_entry_id,
                remote: document,
            })
        }
        .await;
        self.settle(scope, result)
    }

    /// Every version of a file entry, newest first.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_versions(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
    ) -> Result<Vec<FileVersion>> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let versions = self.versions(session.as_ref(), file_entry_id).await?;

            let mut file_versions = Vec::with_capacity(versions.len());
            for version in versions {
                let (file_version_id, _) = self.identifiers.resolve_or_mint(&version.id).await?;
                file_versions.push(FileVersion {
                    file_version_id,
                    file_entry_id: Some(file_entry_id),
                    remote: version,
                });
            }
            Ok(file_versions)
        }
        .await;
        self.settle(scope, result)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Lock a file entry by checking it out.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn lock_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let document = self.latest_document(session.as_ref(), file_entry_id).await?;

            let coordinator = CheckoutCoordinator::new(&session, &self.classifier);
            let locked = coordinator.lock(&document.id).await?;

            let folder_id = self.parent_local_id(session.as_ref(), &locked.id).await?;
            self.to_file_entry(locked, folder_id).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Release the check-out of a file entry without creating a major version.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn unlock_file_entry(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
    ) -> Result<FileEntry> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            let remote_id = self
                .identifiers
                .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
                .await?;

            let coordinator = CheckoutCoordinator::new(&session, &self.classifier);
            let unlocked = coordinator.unlock(&remote_id).await?;

            let folder_id = self.parent_local_id(session.as_ref(), &unlocked.id).await?;
            self.to_file_entry(unlocked, folder_id).await
        }
        .await;
        self.settle(scope, result)
    }

    /// Same as [`unlock_file_entry`](Self::unlock_file_entry); remote check-outs
    /// carry no lock token to compare.
    pub async fn unlock_file_entry_with_lock(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        lock_uuid: &str,
    ) -> Result<FileEntry> {
        debug!("Ignoring lock token {} for file entry {}", lock_uuid, file_entry_id);
        self.unlock_file_entry(scope, file_entry_id).await
    }

    pub fn lock_file_entry_with_owner(&self, _file_entry_id: LocalId, _owner: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("lock_file_entry_with_owner"))
    }

    pub fn refresh_file_entry_lock(&self, _lock_uuid: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("refresh_file_entry_lock"))
    }

    pub fn verify_file_entry_lock(&self, _file_entry_id: LocalId, _lock_uuid: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("verify_file_entry_lock"))
    }

    pub fn lock_folder(&self, _folder_id: LocalId) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("lock_folder"))
    }

    pub fn lock_folder_with_owner(&self, _folder_id: LocalId, _owner: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("lock_folder_with_owner"))
    }

    pub fn refresh_folder_lock(&self, _lock_uuid: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("refresh_folder_lock"))
    }

    pub fn unlock_folder(&self, _folder_id: LocalId, _lock_uuid: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("unlock_folder"))
    }

    pub fn verify_inheritable_lock(&self, _folder_id: LocalId, _lock_uuid: &str) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation("verify_inheritable_lock"))
    }

    // =========================================================================
    // Listings
    // =========================================================================

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_file_entries(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        order: Option<OrderBy>,
        page: Page,
    ) -> Result<Vec<FileEntry>> {
        let listing = self.listing(scope, folder_id).await?;
        Ok(arrange(&listing.file_entries, order.as_ref(), page))
    }

    pub async fn get_file_entries_count(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
    ) -> Result<usize> {
        Ok(self.listing(scope, folder_id).await?.file_entries.len())
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_folders(
        &self,
        scope: &RequestScope,
        parent_folder_id: LocalId,
        order: Option<OrderBy>,
        page: Page,
    ) -> Result<Vec<Folder>> {
        let listing = self.listing(scope, parent_folder_id).await?;
        Ok(arrange(&listing.folders, order.as_ref(), page))
    }

    pub async fn get_folders_count(
        &self,
        scope: &RequestScope,
        parent_folder_id: LocalId,
    ) -> Result<usize> {
        Ok(self.listing(scope, parent_folder_id).await?.folders.len())
    }

    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_folders_and_file_entries(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        order: Option<OrderBy>,
        page: Page,
    ) -> Result<Vec<RepositoryEntity>> {
        let listing = self.listing(scope, folder_id).await?;
        Ok(arrange(&listing.entries, order.as_ref(), page))
    }

    pub async fn get_folders_and_file_entries_count(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
    ) -> Result<usize> {
        Ok(self.listing(scope, folder_id).await?.entries.len())
    }

    /// Total number of file entries directly inside the given folders.
    pub async fn get_folders_file_entries_count(
        &self,
        scope: &RequestScope,
        folder_ids: &[LocalId],
    ) -> Result<usize> {
        let listings = try_join_all(folder_ids.iter().map(|id| self.listing(scope, *id))).await?;
        Ok(listings.iter().map(|listing| listing.file_entries.len()).sum())
    }

    /// Subfolder ids in pre-order, optionally through the whole subtree.
    #[instrument(skip(self, scope), level = "debug")]
    pub async fn get_subfolder_ids(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
        recurse: bool,
    ) -> Result<Vec<LocalId>> {
        let listing = self.listing(scope, folder_id).await?;

        let mut ids = Vec::new();
        let mut pending: Vec<LocalId> = listing.folders.iter().rev().map(|f| f.folder_id).collect();

        while let Some(current) = pending.pop() {
            ids.push(current);
            if recurse {
                let children = self.listing(scope, current).await?;
                pending.extend(children.folders.iter().rev().map(|f| f.folder_id));
            }
        }

        Ok(ids)
    }

    /// Snapshot of a folder's children for this request.
    async fn listing(
        &self,
        scope: &RequestScope,
        folder_id: LocalId,
    ) -> Result<Arc<FolderListing>> {
        let result: Result<_> = async {
            let session = self.session(scope).await?;
            scope
                .listings()
                .get_or_load(folder_id, || self.load_listing(session.as_ref(), folder_id))
                .await
        }
        .await;
        self.settle(scope, result)
    }

    async fn load_listing(
        &self,
        session: &dyn RemoteSession,
        folder_id: LocalId,
    ) -> Result<FolderListing> {
        let remote_id = self
            .identifiers
            .resolve_folder_remote_id(session, folder_id)
            .await?;

        let children = session
            .get_children(&remote_id)
            .await
            .map_err(|e| self.remote_err(e))?;

        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let entry = match child {
                RemoteObject::Folder(folder) => {
                    RepositoryEntity::Folder(self.to_folder(folder, Some(folder_id)).await?)
                }
                RemoteObject::Document(document) => {
                    let file_entry = self.to_file_entry(document, Some(folder_id)).await?;
                    RepositoryEntity::FileEntry(file_entry)
                }
            };
            entries.push(entry);
        }

        debug!("Listed {} children of folder {}", entries.len(), folder_id);
        Ok(FolderListing::new(folder_id, entries))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn session(&self, scope: &RequestScope) -> Result<Arc<dyn RemoteSession>> {
        self.sessions
            .get_session(scope.context())
            .await
            .map_err(|e| self.remote_err(e))
    }

    fn remote_err(&self, error: RemoteError) -> RepositoryError {
        self.classifier.to_error(error)
    }

    /// Drop the context's session when the remote store rejected its credentials.
    fn settle<T>(&self, scope: &RequestScope, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_authentication_required() {
                self.sessions.invalidate(scope.context());
            }
        }
        result
    }

    /// Fail with `DuplicateName` if a sibling document or folder has this title.
    async fn validate_title(
        &self,
        session: &dyn RemoteSession,
        folder_remote_id: &str,
        title: &str,
    ) -> Result<()> {
        if self
            .find_object_id(session, QueryObjectType::Document, title, folder_remote_id)
            .await?
            .is_some()
        {
            return Err(RepositoryError::DuplicateName {
                entity: EntityKind::FileEntry,
                title: title.to_string(),
            });
        }

        if self
            .find_object_id(session, QueryObjectType::Folder, title, folder_remote_id)
            .await?
            .is_some()
        {
            return Err(RepositoryError::DuplicateName {
                entity: EntityKind::Folder,
                title: title.to_string(),
            });
        }

        Ok(())
    }

    async fn find_object_id(
        &self,
        session: &dyn RemoteSession,
        object_type: QueryObjectType,
        name: &str,
        folder_remote_id: &str,
    ) -> Result<Option<String>> {
        let statement = NameQuery::new(object_type, name, folder_remote_id).to_statement();
        let rows = session
            .query(&statement)
            .await
            .map_err(|e| self.remote_err(e))?;

        Ok(rows
            .iter()
            .find_map(|row| row.first_value(PROPERTY_OBJECT_ID))
            .map(str::to_string))
    }

    /// Remote folder behind a local id, repointing the mapping if the store
    /// now reports a different id for it.
    async fn fetch_folder(
        &self,
        session: &dyn RemoteSession,
        folder_id: LocalId,
    ) -> Result<RemoteFolder> {
        let remote_id = self
            .identifiers
            .resolve_folder_remote_id(session, folder_id)
            .await?;
        let detail = format!("{{folderId={}}}", folder_id);

        let folder = session
            .get_object(&remote_id)
            .await
            .map_err(|e| self.remote_err(e))
            .map_err(missing(EntityKind::Folder, detail.clone()))?
            .into_folder()
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Folder, detail))?;

        if folder.id != remote_id {
            self.identifiers.repoint_remote_id(folder_id, &folder.id).await?;
        }
        Ok(folder)
    }

    /// Latest version of a file entry's series, repointing on drift.
    async fn latest_document(
        &self,
        session: &dyn RemoteSession,
        file_entry_id: LocalId,
    ) -> Result<RemoteDocument> {
        let remote_id = self
            .identifiers
            .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
            .await?;

        let document = session
            .get_latest_version(&remote_id)
            .await
            .map_err(|e| self.remote_err(e))
            .map_err(missing(EntityKind::FileEntry, format!("{{fileEntryId={}}}", file_entry_id)))?;

        if document.version_series_id != remote_id {
            self.identifiers
                .repoint_remote_id(file_entry_id, &document.version_series_id)
                .await?;
        }
        Ok(document)
    }

    async fn fetch_file_entry(
        &self,
        session: &dyn RemoteSession,
        file_entry_id: LocalId,
    ) -> Result<FileEntry> {
        let document = self.latest_document(session, file_entry_id).await?;
        let folder_id = self.parent_local_id(session, &document.id).await?;
        self.to_file_entry(document, folder_id).await
    }

    async fn versions(
        &self,
        session: &dyn RemoteSession,
        file_entry_id: LocalId,
    ) -> Result<Vec<RemoteDocument>> {
        let remote_id = self
            .identifiers
            .resolve_remote_id(file_entry_id, EntityKind::FileEntry)
            .await?;

        session
            .get_all_versions(&remote_id)
            .await
            .map_err(|e| self.remote_err(e))
            .map_err(missing(EntityKind::FileEntry, format!("{{fileEntryId={}}}", file_entry_id)))
    }

    /// Repoint after a document change and convert the result.
    async fn finish_document_change(
        &self,
        scope: &RequestScope,
        file_entry_id: LocalId,
        previous_remote_id: &str,
        document: RemoteDocument,
        parent_remote_id: Option<String>,
    ) -> Result<FileEntry> {
        if document.version_series_id != previous_remote_id {
            self.identifiers
                .repoint_remote_id(file_entry_id, &document.version_series_id)
                .await?;
        }

        let folder_id = match parent_remote_id {
            Some(parent_remote_id) => {
                Some(self.identifiers.resolve_or_mint(&parent_remote_id).await?.0)
            }
            None => None,
        };
        if let Some(folder_id) = folder_id {
            scope.listings().evict(folder_id);
        }

        self.to_file_entry(document, folder_id).await
    }

    async fn parent_remote_id(
        &self,
        session: &dyn RemoteSession,
        object_id: &str,
    ) -> Result<Option<String>> {
        let parents = session
            .get_parent_ids(object_id)
            .await
            .map_err(|e| self.remote_err(e))?;
        Ok(parents.into_iter().next())
    }

    async fn parent_local_id(
        &self,
        session: &dyn RemoteSession,
        object_id: &str,
    ) -> Result<Option<LocalId>> {
        match self.parent_remote_id(session, object_id).await? {
            Some(parent_remote_id) => {
                let (local_id, _) = self.identifiers.resolve_or_mint(&parent_remote_id).await?;
                Ok(Some(local_id))
            }
            None => Ok(None),
        }
    }

    async fn parent_of_folder(&self, folder: &RemoteFolder) -> Result<Option<LocalId>> {
        match &folder.parent_id {
            Some(parent_id) => Ok(Some(self.identifiers.resolve_or_mint(parent_id).await?.0)),
            None => Ok(None),
        }
    }

    async fn to_folder(
        &self,
        remote: RemoteFolder,
        parent_folder_id: Option<LocalId>,
    ) -> Result<Folder> {
        let (folder_id, uuid) = self.identifiers.resolve_or_mint(&remote.id).await?;
        Ok(Folder {
            folder_id,
            uuid,
            repository_id: self.repository_id(),
            parent_folder_id,
            remote,
        })
    }

    async fn to_file_entry(
        &self,
        remote: RemoteDocument,
        folder_id: Option<LocalId>,
    ) -> Result<FileEntry> {
        let (file_entry_id, uuid) = self
            .identifiers
            .resolve_or_mint(&remote.version_series_id)
            .await?;
        Ok(FileEntry {
            file_entry_id,
            uuid,
            repository_id: self.repository_id(),
            folder_id,
            remote,
        })
    }
}

/// Name a remote "object not found" after the entity the caller asked for.
fn missing(entity: EntityKind, detail: String) -> impl FnOnce(RepositoryError) -> RepositoryError {
    move |e| match e {
        RepositoryError::NotFound {
            entity: EntityKind::RemoteObject,
            ..
        } => RepositoryError::not_found(entity, detail),
        other => other,
    }
}
