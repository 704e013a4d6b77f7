//! Core traits and types for the CMIS repository adapter.
//!
//! This crate defines the abstractions shared between the adapter and its collaborators:
//! - `RemoteSession`: Authenticated handle to a CMIS-compliant remote store
//! - `ConnectionFactory`: Opens remote sessions and reports the configured login
//! - `MappingStore`: Durable local-id <-> remote-id mapping rows
//! - `IdCounter`: Source of freshly minted local ids
//! - `HostFolders`: Host-side folder table used to recognize mount points

mod error;
mod mapping;
mod model;
mod query;
mod remote;

pub use error::{RemoteError, StoreError};
pub use mapping::{HostFolderKind, HostFolders, IdCounter, IdentifierMapping, MappingStore};
pub use model::{
    Action, AllowableActions, ContentStream, LocalId, Properties, QueryRow, RemoteDocument,
    RemoteFolder, RemoteObject, RepositoryInfo, DEFAULT_VERSION_LABEL, PROPERTY_NAME,
    PROPERTY_OBJECT_ID,
};
pub use query::{NameQuery, QueryObjectType};
pub use remote::{ConnectionFactory, RemoteSession};
