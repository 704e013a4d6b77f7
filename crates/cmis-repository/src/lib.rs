//! Adapter exposing a remote CMIS repository through stable local ids.
//!
//! - [`IdentifierMap`]: durable local id <-> remote id mapping, repointed when
//!   the remote id drifts
//! - [`SessionCache`]: one authenticated session per [`UserContext`]
//! - [`ListingCache`]: folder listings cached for one [`RequestScope`]
//! - [`ExceptionClassifier`]: remote faults to [`RepositoryError`]
//! - [`CheckoutCoordinator`]: check-out / check-in for updates, reverts and locks
//! - [`CmisRepository`]: the public entity operations

pub mod checkout;
pub mod classifier;
pub mod config;
pub mod entity;
pub mod error;
pub mod identifier_map;
pub mod listing_cache;
pub mod repository;
pub mod session_cache;

pub use checkout::{CheckoutCoordinator, CheckoutState, DocumentChange};
pub use classifier::{Classification, ExceptionClassifier};
pub use config::{DeleteDepth, RepositoryConfig};
pub use entity::{FileEntry, FileVersion, Folder, RepositoryEntity, SortKey};
pub use error::{EntityKind, ErrorKind, RepositoryError, Result};
pub use identifier_map::IdentifierMap;
pub use listing_cache::{
    arrange, FolderListing, ListingCache, OrderBy, OrderField, Page, RequestScope, ALL_POS,
};
pub use repository::CmisRepository;
pub use session_cache::{SessionCache, UserContext};
