/// Faults raised by the remote store or the transport in front of it.
///
/// The variants follow the CMIS exception families that the adapter has to
/// tell apart; everything else ends up in `Runtime`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Update conflict: {0}")]
    UpdateConflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Runtime(String),
}

/// Errors raised by the mapping store, the id counter and the host folder table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate mapping: {0}")]
    Duplicate(String),

    #[error("Mapping not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
