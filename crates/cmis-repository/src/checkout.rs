//! Check-out / check-in protocol behind document updates, reverts and locks.
//!
//! One invocation walks `Idle -> CheckedOut -> CheckedIn | CancelledOut`.
//! When the store does not offer check-out for a document, changes are
//! written directly and the cycle is skipped. A check-out taken by an
//! invocation is always either checked in or cancelled before it returns.
//! If the invocation's future is dropped while it holds a check-out, the
//! cancel is spawned onto the current tokio runtime instead.

use std::sync::Arc;

use cmis_repository_core::{
    Action, AllowableActions, ContentStream, Properties, RemoteDocument, RemoteError,
    RemoteSession,
};
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

use crate::classifier::ExceptionClassifier;
use crate::error::{EntityKind, RepositoryError, Result};

/// Checkout state of one coordinator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    CheckedOut { working_copy_id: String },
    CheckedIn,
    CancelledOut,
}

/// Payload of a document update.
#[derive(Debug, Clone, Default)]
pub struct DocumentChange {
    /// New title. Ignored when empty or unchanged
    pub title: Option<String>,
    pub content: Option<ContentStream>,
    pub change_log: String,
    pub major_version: bool,
}

impl DocumentChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: ContentStream) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_change_log(mut self, change_log: impl Into<String>) -> Self {
        self.change_log = change_log.into();
        self
    }

    pub fn major(mut self, major_version: bool) -> Self {
        self.major_version = major_version;
        self
    }

    /// `cmis:name` update, only when the title actually changes.
    fn properties_for(&self, current_name: &str) -> Option<Properties> {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty() && *title != current_name)
            .map(Properties::with_name)
    }
}

/// Tracks the check-out an invocation holds. Cancels it on drop unless
/// released, checked in or kept.
struct Checkout {
    session: Arc<dyn RemoteSession>,
    state: CheckoutState,
}

impl Checkout {
    fn new(session: &Arc<dyn RemoteSession>) -> Self {
        Self {
            session: Arc::clone(session),
            state: CheckoutState::Idle,
        }
    }

    async fn check_out(&mut self, document_id: &str) -> std::result::Result<(), RemoteError> {
        let working_copy_id = self.session.check_out(document_id).await?;
        debug!("Checked out {} as {}", document_id, working_copy_id);
        self.state = CheckoutState::CheckedOut { working_copy_id };
        Ok(())
    }

    fn working_copy_id(&self) -> Option<&str> {
        match &self.state {
            CheckoutState::CheckedOut { working_copy_id } => Some(working_copy_id),
            _ => None,
        }
    }

    async fn check_in(
        &mut self,
        working_copy_id: &str,
        change: &DocumentChange,
        properties: Option<&Properties>,
    ) -> std::result::Result<RemoteDocument, RemoteError> {
        let document = self
            .session
            .check_in(
                working_copy_id,
                change.major_version,
                properties,
                change.content.clone(),
                &change.change_log,
            )
            .await?;
        self.state = CheckoutState::CheckedIn;
        Ok(document)
    }

    /// Cancel a check-out still held. Runs on every exit path.
    async fn release(&mut self) {
        let Some(working_copy_id) = self.working_copy_id().map(str::to_string) else {
            return;
        };

        match self.session.cancel_check_out(&working_copy_id).await {
            Ok(()) => debug!("Cancelled check-out {}", working_copy_id),
            Err(e) => warn!("Failed to cancel check-out {}: {}", working_copy_id, e),
        }
        self.state = CheckoutState::CancelledOut;
    }

    /// Leave the check-out in place past this invocation.
    fn keep(mut self) {
        self.state = CheckoutState::Idle;
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let CheckoutState::CheckedOut { working_copy_id } =
            std::mem::replace(&mut self.state, CheckoutState::CancelledOut)
        else {
            return;
        };

        let Ok(handle) = Handle::try_current() else {
            warn!("Check-out {} abandoned outside a runtime", working_copy_id);
            return;
        };

        warn!("Check-out {} abandoned, cancelling in the background", working_copy_id);
        let session = Arc::clone(&self.session);
        handle.spawn(async move {
            match session.cancel_check_out(&working_copy_id).await {
                Ok(()) => debug!("Cancelled abandoned check-out {}", working_copy_id),
                Err(e) => warn!("Failed to cancel check-out {}: {}", working_copy_id, e),
            }
        });
    }
}

/// Drives document mutations through the remote check-out protocol.
pub struct CheckoutCoordinator<'a> {
    session: &'a Arc<dyn RemoteSession>,
    classifier: &'a ExceptionClassifier,
}

impl<'a> CheckoutCoordinator<'a> {
    pub fn new(session: &'a Arc<dyn RemoteSession>, classifier: &'a ExceptionClassifier) -> Self {
        Self { session, classifier }
    }

    /// Apply a change to a document and return the latest version of its series.
    #[instrument(skip(self, change), level = "debug")]
    pub async fn update(
        &self,
        document_id: &str,
        change: DocumentChange,
    ) -> Result<RemoteDocument> {
        let document = self.fetch_document(document_id).await?;
        let properties = change.properties_for(&document.name);

        check_updatable(
            &document.allowable_actions,
            properties.is_some(),
            change.content.is_some(),
        )?;

        let mut checkout = Checkout::new(self.session);
        if document.allowable_actions.contains(Action::CanCheckOut) {
            checkout
                .check_out(&document.id)
                .await
                .map_err(|e| self.classifier.to_error(e))?;
        }

        let committed = self
            .commit(&mut checkout, &document, &change, properties.as_ref())
            .await;
        checkout.release().await;

        let version_series_id = committed.map_err(|e| self.classifier.to_error(e))?;
        self.latest(&version_series_id).await
    }

    /// Check in through the held check-out, or write directly without one.
    /// Returns the version series id the change landed in.
    async fn commit(
        &self,
        checkout: &mut Checkout,
        document: &RemoteDocument,
        change: &DocumentChange,
        properties: Option<&Properties>,
    ) -> std::result::Result<String, RemoteError> {
        if let Some(working_copy_id) = checkout.working_copy_id().map(str::to_string) {
            let checked_in = checkout.check_in(&working_copy_id, change, properties).await?;
            return Ok(checked_in.version_series_id);
        }

        let latest = self.session.get_latest_version(&document.version_series_id).await?;
        let mut object_id = latest.id;
        let mut version_series_id = latest.version_series_id;

        if let Some(properties) = properties {
            let updated = self.session.update_properties(&object_id, properties).await?;
            object_id = updated.id().to_string();
            version_series_id = updated.mapped_id().to_string();
        }

        if let Some(content) = change.content.clone() {
            self.session.set_content_stream(&object_id, content, true).await?;
        }

        Ok(version_series_id)
    }

    /// Make a historical version the latest one.
    #[instrument(skip(self), level = "debug")]
    pub async fn revert(&self, version_series_id: &str, version: &str) -> Result<RemoteDocument> {
        let versions = self
            .session
            .get_all_versions(version_series_id)
            .await
            .map_err(|e| self.classifier.to_error(e))?;

        let target = versions
            .into_iter()
            .find(|v| v.effective_version_label() == version)
            .ok_or_else(|| {
                RepositoryError::not_found(
                    EntityKind::FileVersion,
                    format!("{{versionSeriesId={}, version={}}}", version_series_id, version),
                )
            })?;

        let content = self
            .session
            .get_content_stream(&target.id)
            .await
            .map_err(|e| self.classifier.to_error(e))?;

        let latest = self
            .session
            .get_latest_version(version_series_id)
            .await
            .map_err(|e| self.classifier.to_error(e))?;

        let change = DocumentChange::new()
            .with_title(target.name.clone())
            .with_content(content)
            .with_change_log(format!("Reverted to {}", version))
            .major(true);

        self.update(&latest.id, change).await
    }

    /// Hold a check-out on the document.
    #[instrument(skip(self), level = "debug")]
    pub async fn lock(&self, document_id: &str) -> Result<RemoteDocument> {
        let document = self.fetch_document(document_id).await?;

        if !document.allowable_actions.contains(Action::CanCheckOut) {
            return Err(RepositoryError::PermissionDenied(format!(
                "Document {} cannot be checked out",
                document.name
            )));
        }

        let mut checkout = Checkout::new(self.session);
        checkout
            .check_out(&document.id)
            .await
            .map_err(|e| self.classifier.to_error(e))?;
        checkout.keep();

        self.latest(&document.version_series_id).await
    }

    /// Release a held check-out without producing a new major version.
    /// A document that is not checked out is returned unchanged.
    #[instrument(skip(self), level = "debug")]
    pub async fn unlock(&self, version_series_id: &str) -> Result<RemoteDocument> {
        let document = self.latest(version_series_id).await?;

        let Some(working_copy_id) = document.checked_out_id.clone() else {
            debug!("Document {} is not checked out", document.id);
            return Ok(document);
        };

        self.session
            .check_in(&working_copy_id, false, None, None, "")
            .await
            .map_err(|e| self.classifier.to_error(e))?;

        self.latest(version_series_id).await
    }

    async fn fetch_document(&self, document_id: &str) -> Result<RemoteDocument> {
        let object = self
            .session
            .get_object(document_id)
            .await
            .map_err(|e| self.classifier.to_error(e))?;

        object.into_document().ok_or_else(|| {
            RepositoryError::not_found(
                EntityKind::FileEntry,
                format!("{{objectId={}}}", document_id),
            )
        })
    }

    async fn latest(&self, version_series_id: &str) -> Result<RemoteDocument> {
        self.session
            .get_latest_version(version_series_id)
            .await
            .map_err(|e| self.classifier.to_error(e))
    }
}

/// Reject a change the allowable actions do not permit, before any mutation.
fn check_updatable(actions: &AllowableActions, renames: bool, writes_content: bool) -> Result<()> {
    if renames && !actions.contains(Action::CanUpdateProperties) {
        return Err(RepositoryError::PermissionDenied(
            "Updating properties is not allowed".to_string(),
        ));
    }
    if writes_content && !actions.contains(Action::CanSetContentStream) {
        return Err(RepositoryError::PermissionDenied(
            "Setting content is not allowed".to_string(),
        ));
    }
    Ok(())
}
