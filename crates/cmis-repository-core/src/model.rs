use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host-assigned durable identifier of a folder, file entry or file version.
pub type LocalId = i64;

/// CMIS property id of an object's name.
pub const PROPERTY_NAME: &str = "cmis:name";

/// CMIS property id of an object's id.
pub const PROPERTY_OBJECT_ID: &str = "cmis:objectId";

/// Version label assumed for versions the remote store leaves unlabelled.
pub const DEFAULT_VERSION_LABEL: &str = "1.0";

/// Allowable actions the adapter inspects before mutating an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    CanGetProperties,
    CanUpdateProperties,
    CanGetContentStream,
    CanSetContentStream,
    CanDeleteContentStream,
    CanGetChildren,
    CanCreateDocument,
    CanCreateFolder,
    CanMoveObject,
    CanDeleteObject,
    CanDeleteTree,
    CanCheckOut,
    CanCancelCheckOut,
    CanCheckIn,
    CanGetAllVersions,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::CanGetProperties,
        Action::CanUpdateProperties,
        Action::CanGetContentStream,
        Action::CanSetContentStream,
        Action::CanDeleteContentStream,
        Action::CanGetChildren,
        Action::CanCreateDocument,
        Action::CanCreateFolder,
        Action::CanMoveObject,
        Action::CanDeleteObject,
        Action::CanDeleteTree,
        Action::CanCheckOut,
        Action::CanCancelCheckOut,
        Action::CanCheckIn,
        Action::CanGetAllVersions,
    ];

    /// Name used by the CMIS bindings (`canCheckOut`, ...).
    pub fn as_cmis(&self) -> &'static str {
        match self {
            Action::CanGetProperties => "canGetProperties",
            Action::CanUpdateProperties => "canUpdateProperties",
            Action::CanGetContentStream => "canGetContentStream",
            Action::CanSetContentStream => "canSetContentStream",
            Action::CanDeleteContentStream => "canDeleteContentStream",
            Action::CanGetChildren => "canGetChildren",
            Action::CanCreateDocument => "canCreateDocument",
            Action::CanCreateFolder => "canCreateFolder",
            Action::CanMoveObject => "canMoveObject",
            Action::CanDeleteObject => "canDeleteObject",
            Action::CanDeleteTree => "canDeleteTree",
            Action::CanCheckOut => "canCheckOut",
            Action::CanCancelCheckOut => "canCancelCheckOut",
            Action::CanCheckIn => "canCheckIn",
            Action::CanGetAllVersions => "canGetAllVersions",
        }
    }

    /// Parse a CMIS binding action name. Unknown actions yield `None`.
    pub fn from_cmis(name: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|a| a.as_cmis() == name)
    }
}

/// Set of actions the remote store currently allows on an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowableActions(BTreeSet<Action>);

impl AllowableActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    pub fn insert(&mut self, action: Action) {
        self.0.insert(action);
    }

    pub fn remove(&mut self, action: Action) {
        self.0.remove(&action);
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Action> for AllowableActions {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Information about the remote repository a session is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
    pub root_folder_id: String,
    #[serde(default)]
    pub product_name: Option<String>,
}

/// A folder as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    /// Remote id of the parent folder (`None` for the repository root)
    pub parent_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowable_actions: AllowableActions,
}

/// One version of a document as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Object id of this particular version
    pub id: String,
    /// Id shared by every version of the document
    pub version_series_id: String,
    pub name: String,
    pub version_label: Option<String>,
    pub is_latest_version: bool,
    /// Private working copy id while the version series is checked out
    pub checked_out_id: Option<String>,
    pub content_length: u64,
    pub mime_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowable_actions: AllowableActions,
}

impl RemoteDocument {
    /// Version label, falling back to the default label for unlabelled versions.
    pub fn effective_version_label(&self) -> &str {
        self.version_label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or(DEFAULT_VERSION_LABEL)
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out_id.is_some()
    }
}

/// A child or lookup result, classified once by base type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", rename_all = "snake_case")]
pub enum RemoteObject {
    Folder(RemoteFolder),
    Document(RemoteDocument),
}

impl RemoteObject {
    pub fn id(&self) -> &str {
        match self {
            RemoteObject::Folder(f) => &f.id,
            RemoteObject::Document(d) => &d.id,
        }
    }

    /// Id the adapter maps to a local id: folder id, or version series id for documents.
    pub fn mapped_id(&self) -> &str {
        match self {
            RemoteObject::Folder(f) => &f.id,
            RemoteObject::Document(d) => &d.version_series_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteObject::Folder(f) => &f.name,
            RemoteObject::Document(d) => &d.name,
        }
    }

    pub fn into_folder(self) -> Option<RemoteFolder> {
        match self {
            RemoteObject::Folder(f) => Some(f),
            RemoteObject::Document(_) => None,
        }
    }

    pub fn into_document(self) -> Option<RemoteDocument> {
        match self {
            RemoteObject::Document(d) => Some(d),
            RemoteObject::Folder(_) => None,
        }
    }
}

/// Document content. Never cached by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStream {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl ContentStream {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type,
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Property values submitted with update and check-in calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties carrying only a new `cmis:name`.
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut properties = Self::new();
        properties.set(PROPERTY_NAME, name);
        properties
    }

    pub fn set(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.0.insert(id.into(), value.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(PROPERTY_NAME)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One row of a structured query result: property id -> values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRow(BTreeMap<String, Vec<String>>);

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, property_id: impl Into<String>, values: Vec<String>) {
        self.0.insert(property_id.into(), values);
    }

    /// First value of a property, if the row carries one.
    pub fn first_value(&self, property_id: &str) -> Option<&str> {
        self.0
            .get(property_id)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}
