use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{
    ContentStream, Properties, QueryRow, RemoteDocument, RemoteFolder, RemoteObject,
    RepositoryInfo,
};

/// Authenticated handle to a CMIS-compliant remote store.
///
/// Every method is a network round trip. Document lookups by version series
/// id resolve to the latest version of the series.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Whether the handle can still be used (credentials not revoked, etc).
    fn is_usable(&self) -> bool {
        true
    }

    /// Repository information, including the root folder id.
    async fn repository_info(&self) -> Result<RepositoryInfo, RemoteError>;

    /// Fetch an object by id with fresh properties and allowable actions.
    async fn get_object(&self, object_id: &str) -> Result<RemoteObject, RemoteError>;

    /// Remote ids of the folders an object is filed in.
    async fn get_parent_ids(&self, object_id: &str) -> Result<Vec<String>, RemoteError>;

    /// Children of a folder in the store's native order.
    async fn get_children(&self, folder_id: &str) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Run a CMIS-QL query.
    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, RemoteError>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteFolder, RemoteError>;

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content: ContentStream,
    ) -> Result<RemoteDocument, RemoteError>;

    /// Copy the latest version of a document into another folder.
    async fn copy_document(
        &self,
        document_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteDocument, RemoteError>;

    /// Move an object between folders. The returned object may carry a new id.
    async fn move_object(
        &self,
        object_id: &str,
        source_folder_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteObject, RemoteError>;

    /// Update properties in place. The returned object may carry a new id.
    async fn update_properties(
        &self,
        object_id: &str,
        properties: &Properties,
    ) -> Result<RemoteObject, RemoteError>;

    async fn set_content_stream(
        &self,
        document_id: &str,
        content: ContentStream,
        overwrite: bool,
    ) -> Result<(), RemoteError>;

    async fn get_content_stream(&self, document_id: &str) -> Result<ContentStream, RemoteError>;

    /// Every version of a document, newest first.
    async fn get_all_versions(
        &self,
        version_series_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError>;

    async fn get_latest_version(
        &self,
        version_series_id: &str,
    ) -> Result<RemoteDocument, RemoteError>;

    /// Check out a document. Returns the private working copy id.
    async fn check_out(&self, document_id: &str) -> Result<String, RemoteError>;

    /// Check in a private working copy.
    async fn check_in(
        &self,
        working_copy_id: &str,
        major: bool,
        properties: Option<&Properties>,
        content: Option<ContentStream>,
        comment: &str,
    ) -> Result<RemoteDocument, RemoteError>;

    async fn cancel_check_out(&self, working_copy_id: &str) -> Result<(), RemoteError>;

    async fn delete_all_versions(&self, document_id: &str) -> Result<(), RemoteError>;

    /// Delete a folder and everything below it.
    async fn delete_tree(&self, folder_id: &str) -> Result<(), RemoteError>;
}

/// Opens authenticated sessions against one remote repository.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new session for a user context.
    async fn open_session(&self, context_id: &str) -> Result<Arc<dyn RemoteSession>, RemoteError>;

    /// Login identity currently configured for the remote store.
    fn login(&self) -> Result<String, RemoteError>;

    /// Connection configurations this adapter type accepts.
    fn supported_configurations(&self) -> Vec<String>;

    /// Connection parameters accepted per configuration.
    fn supported_parameters(&self) -> Vec<Vec<String>>;
}
