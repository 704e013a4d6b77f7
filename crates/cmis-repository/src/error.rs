//! Domain error taxonomy surfaced by every public repository operation.

use std::fmt;

use cmis_repository_core::{RemoteError, StoreError};

/// Kind of host entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Folder,
    FileEntry,
    FileVersion,
    Mapping,
    RemoteObject,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Folder => "folder",
            EntityKind::FileEntry => "file entry",
            EntityKind::FileVersion => "file version",
            EntityKind::Mapping => "repository entry",
            EntityKind::RemoteObject => "remote object",
        };
        f.write_str(name)
    }
}

/// Taxonomy kind, for callers that only care about the error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateName,
    PermissionDenied,
    UnsupportedOperation,
    RepositoryFault,
}

/// Errors returned by the repository adapter.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("No {entity} with {detail}")]
    NotFound { entity: EntityKind, detail: String },

    #[error("Duplicate {entity} name: {title}")]
    DuplicateName { entity: EntityKind, title: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{message}")]
    AuthenticationRequired {
        message: String,
        #[source]
        source: RemoteError,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Repository fault: {message}")]
    Fault {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RepositoryError {
    pub fn not_found(entity: EntityKind, detail: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            detail: detail.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
            source: None,
        }
    }

    pub fn fault_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fault {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound { .. } => ErrorKind::NotFound,
            RepositoryError::DuplicateName { .. } => ErrorKind::DuplicateName,
            RepositoryError::PermissionDenied(_)
            | RepositoryError::AuthenticationRequired { .. } => ErrorKind::PermissionDenied,
            RepositoryError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            RepositoryError::Fault { .. } => ErrorKind::RepositoryFault,
        }
    }

    /// Whether the failure must be escalated as a login problem.
    pub fn is_authentication_required(&self) -> bool {
        matches!(self, RepositoryError::AuthenticationRequired { .. })
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(detail) => Self::not_found(EntityKind::Mapping, detail),
            other => Self::fault_with("Mapping store error", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
