//! Local collaborators for the CMIS repository adapter.
//!
//! - [`InMemoryStore`] / [`InMemoryConnectionFactory`]: CMIS-like remote store
//!   held in memory, with call counters and failure injection
//! - [`InMemoryMappingStore`], [`JsonFileMappingStore`]: mapping stores
//! - [`AtomicIdCounter`], [`StaticHostFolders`]: id counter and mount-point table

mod host;
mod mapping;
mod remote;

pub use host::{AtomicIdCounter, StaticHostFolders};
pub use mapping::{InMemoryMappingStore, JsonFileMappingStore};
pub use remote::{InMemoryConnectionFactory, InMemorySession, InMemoryStore};
