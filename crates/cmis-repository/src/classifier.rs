//! Translation of remote faults into the domain error taxonomy.
//!
//! Consulted once at every remote-call boundary, never deeper in the stack.

use std::sync::Arc;

use cmis_repository_core::{ConnectionFactory, RemoteError};
use tracing::debug;

use crate::error::{EntityKind, ErrorKind, RepositoryError};

/// Outcome of classifying a remote fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub auth_needed: bool,
    pub message: String,
}

/// Maps remote faults onto [`RepositoryError`], detecting authorization failures.
pub struct ExceptionClassifier {
    factory: Arc<dyn ConnectionFactory>,
}

impl ExceptionClassifier {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    /// Classify a remote fault without consuming it.
    pub fn classify(&self, error: &RemoteError) -> Classification {
        if is_authorization_failure(error) {
            return Classification {
                kind: ErrorKind::PermissionDenied,
                auth_needed: true,
                message: self.login_message(error),
            };
        }

        let kind = match error {
            RemoteError::ObjectNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::RepositoryFault,
        };

        Classification {
            kind,
            auth_needed: false,
            message: error.to_string(),
        }
    }

    /// Convert a remote fault into the error returned to callers.
    pub fn to_error(&self, error: RemoteError) -> RepositoryError {
        let classification = self.classify(&error);

        if classification.auth_needed {
            debug!("Authorization failure from remote store: {}", error);
            return RepositoryError::AuthenticationRequired {
                message: classification.message,
                source: error,
            };
        }

        match error {
            RemoteError::ObjectNotFound(detail) => RepositoryError::not_found(
                EntityKind::RemoteObject,
                format!("{{objectId={}}}", detail),
            ),
            other => RepositoryError::Fault {
                message: classification.message,
                source: Some(Box::new(other)),
            },
        }
    }

    /// Names the configured remote login, falling back to the fault's own message.
    fn login_message(&self, error: &RemoteError) -> String {
        match self.factory.login() {
            Ok(login) => format!("Unable to login with user {}", login),
            Err(_) => error.to_string(),
        }
    }
}

fn is_authorization_failure(error: &RemoteError) -> bool {
    match error {
        RemoteError::PermissionDenied(_) => true,
        // Only generic runtime faults carry login failures in their text
        RemoteError::Runtime(message) => message.to_lowercase().contains("authorized"),
        _ => false,
    }
}
