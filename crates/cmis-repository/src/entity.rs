//! Host-facing entity shapes: remote objects paired with their local ids.

use chrono::{DateTime, Utc};
use cmis_repository_core::{LocalId, RemoteDocument, RemoteFolder};
use serde::Serialize;

/// A remote folder under its durable local id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub folder_id: LocalId,
    pub uuid: String,
    pub repository_id: i64,
    /// Local id of the parent, `None` for the mounted root
    pub parent_folder_id: Option<LocalId>,
    pub remote: RemoteFolder,
}

impl Folder {
    pub fn name(&self) -> &str {
        &self.remote.name
    }

    pub fn remote_id(&self) -> &str {
        &self.remote.id
    }

    /// Whether this folder is the remote repository root.
    pub fn is_root(&self) -> bool {
        self.remote.parent_id.is_none()
    }
}

/// The latest version of a remote document under its durable local id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub file_entry_id: LocalId,
    pub uuid: String,
    pub repository_id: i64,
    pub folder_id: Option<LocalId>,
    pub remote: RemoteDocument,
}

impl FileEntry {
    pub fn title(&self) -> &str {
        &self.remote.name
    }

    pub fn version(&self) -> &str {
        self.remote.effective_version_label()
    }

    pub fn version_series_id(&self) -> &str {
        &self.remote.version_series_id
    }

    pub fn is_checked_out(&self) -> bool {
        self.remote.is_checked_out()
    }
}

/// One historical version of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_version_id: LocalId,
    /// Local id of the owning file entry, if it is mapped
    pub file_entry_id: Option<LocalId>,
    pub remote: RemoteDocument,
}

impl FileVersion {
    pub fn version(&self) -> &str {
        self.remote.effective_version_label()
    }
}

/// Folder child: either a subfolder or a file entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryEntity {
    Folder(Folder),
    FileEntry(FileEntry),
}

impl RepositoryEntity {
    pub fn local_id(&self) -> LocalId {
        match self {
            RepositoryEntity::Folder(f) => f.folder_id,
            RepositoryEntity::FileEntry(e) => e.file_entry_id,
        }
    }
}

/// Attributes listings can be ordered by.
pub trait SortKey {
    fn sort_title(&self) -> &str;
    fn sort_created_at(&self) -> Option<DateTime<Utc>>;
    fn sort_modified_at(&self) -> Option<DateTime<Utc>>;
    /// Content size; folders report zero
    fn sort_size(&self) -> u64;
}

impl SortKey for Folder {
    fn sort_title(&self) -> &str {
        &self.remote.name
    }

    fn sort_created_at(&self) -> Option<DateTime<Utc>> {
        self.remote.created_at
    }

    fn sort_modified_at(&self) -> Option<DateTime<Utc>> {
        self.remote.modified_at
    }

    fn sort_size(&self) -> u64 {
        0
    }
}

impl SortKey for FileEntry {
    fn sort_title(&self) -> &str {
        &self.remote.name
    }

    fn sort_created_at(&self) -> Option<DateTime<Utc>> {
        self.remote.created_at
    }

    fn sort_modified_at(&self) -> Option<DateTime<Utc>> {
        self.remote.modified_at
    }

    fn sort_size(&self) -> u64 {
        self.remote.content_length
    }
}

impl SortKey for RepositoryEntity {
    fn sort_title(&self) -> &str {
        match self {
            RepositoryEntity::Folder(f) => f.sort_title(),
            RepositoryEntity::FileEntry(e) => e.sort_title(),
        }
    }

    fn sort_created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RepositoryEntity::Folder(f) => f.sort_created_at(),
            RepositoryEntity::FileEntry(e) => e.sort_created_at(),
        }
    }

    fn sort_modified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RepositoryEntity::Folder(f) => f.sort_modified_at(),
            RepositoryEntity::FileEntry(e) => e.sort_modified_at(),
        }
    }

    fn sort_size(&self) -> u64 {
        match self {
            RepositoryEntity::Folder(f) => f.sort_size(),
            RepositoryEntity::FileEntry(e) => e.sort_size(),
        }
    }
}
