//! JSON shapes of the CMIS 1.1 Browser Binding (succinct form).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cmis_repository_core::{
    Action, AllowableActions, QueryRow, RemoteDocument, RemoteError, RemoteFolder, RemoteObject,
    RepositoryInfo, PROPERTY_NAME, PROPERTY_OBJECT_ID,
};
use serde::Deserialize;
use serde_json::{Map, Value};

const BASE_TYPE_FOLDER: &str = "cmis:folder";
const BASE_TYPE_DOCUMENT: &str = "cmis:document";

/// Entry of the service document returned by the binding's base URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEntry {
    pub repository_id: String,
    #[serde(default)]
    pub repository_name: String,
    pub root_folder_id: String,
    #[serde(default)]
    pub product_name: Option<String>,
    pub repository_url: String,
    pub root_folder_url: String,
}

impl RepositoryEntry {
    pub fn info(&self) -> RepositoryInfo {
        RepositoryInfo {
            id: self.repository_id.clone(),
            name: self.repository_name.clone(),
            root_folder_id: self.root_folder_id.clone(),
            product_name: self.product_name.clone(),
        }
    }
}

/// Service document: repository id -> repository entry.
pub type ServiceDocument = BTreeMap<String, RepositoryEntry>;

/// Object as returned with `succinct=true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectData {
    #[serde(default)]
    pub succinct_properties: Map<String, Value>,
    #[serde(default)]
    pub allowable_actions: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectInFolder {
    pub object: ObjectData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenPage {
    #[serde(default)]
    pub objects: Vec<ObjectInFolder>,
    #[serde(default)]
    pub has_more_items: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub results: Vec<ObjectData>,
    #[serde(default)]
    pub has_more_items: bool,
}

/// Error body the binding sends with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub exception: String,
    #[serde(default)]
    pub message: String,
}

impl ObjectData {
    fn string(&self, id: &str) -> Option<String> {
        match self.succinct_properties.get(id)? {
            Value::Array(values) => values.first().and_then(scalar_string),
            value => scalar_string(value),
        }
    }

    fn required(&self, id: &str) -> Result<String, RemoteError> {
        self.string(id)
            .ok_or_else(|| RemoteError::Runtime(format!("Object is missing property {}", id)))
    }

    fn bool(&self, id: &str) -> Option<bool> {
        self.succinct_properties.get(id).and_then(Value::as_bool)
    }

    fn u64(&self, id: &str) -> Option<u64> {
        self.succinct_properties.get(id).and_then(Value::as_u64)
    }

    /// Dates travel as epoch milliseconds.
    fn date(&self, id: &str) -> Option<DateTime<Utc>> {
        self.succinct_properties
            .get(id)
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
    }

    pub fn object_id(&self) -> Result<String, RemoteError> {
        self.required(PROPERTY_OBJECT_ID)
    }

    fn actions(&self) -> AllowableActions {
        self.allowable_actions
            .iter()
            .flat_map(|actions| actions.iter())
            .filter(|(_, allowed)| allowed.as_bool().unwrap_or(false))
            .filter_map(|(name, _)| Action::from_cmis(name))
            .collect()
    }

    pub fn into_remote(self) -> Result<RemoteObject, RemoteError> {
        let base_type = self.required("cmis:baseTypeId")?;
        match base_type.as_str() {
            BASE_TYPE_FOLDER => self.into_folder().map(RemoteObject::Folder),
            BASE_TYPE_DOCUMENT => self.into_document().map(RemoteObject::Document),
            other => Err(RemoteError::Runtime(format!("Unsupported base type {}", other))),
        }
    }

    pub fn into_folder(self) -> Result<RemoteFolder, RemoteError> {
        Ok(RemoteFolder {
            id: self.object_id()?,
            name: self.required(PROPERTY_NAME)?,
            parent_id: self.string("cmis:parentId"),
            path: self.string("cmis:path"),
            created_at: self.date("cmis:creationDate"),
            modified_at: self.date("cmis:lastModificationDate"),
            allowable_actions: self.actions(),
        })
    }

    pub fn into_document(self) -> Result<RemoteDocument, RemoteError> {
        let id = self.object_id()?;
        Ok(RemoteDocument {
            version_series_id: self.string("cmis:versionSeriesId").unwrap_or_else(|| id.clone()),
            name: self.required(PROPERTY_NAME)?,
            version_label: self.string("cmis:versionLabel"),
            is_latest_version: self.bool("cmis:isLatestVersion").unwrap_or(true),
            checked_out_id: self.string("cmis:versionSeriesCheckedOutId"),
            content_length: self.u64("cmis:contentStreamLength").unwrap_or(0),
            mime_type: self.string("cmis:contentStreamMimeType"),
            created_at: self.date("cmis:creationDate"),
            modified_at: self.date("cmis:lastModificationDate"),
            allowable_actions: self.actions(),
            id,
        })
    }

    pub fn into_query_row(self) -> QueryRow {
        let mut row = QueryRow::new();
        for (id, value) in self.succinct_properties {
            let values = match value {
                Value::Array(values) => values.iter().filter_map(scalar_string).collect(),
                value => scalar_string(&value).into_iter().collect(),
            };
            row.insert(id, values);
        }
        row
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Decode a JSON body, reporting malformed payloads as runtime faults.
pub fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value)
        .map_err(|e| RemoteError::Runtime(format!("Malformed CMIS response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> ObjectData {
        decode(value).unwrap()
    }

    #[test]
    fn test_document_properties() {
        let data = object(json!({
            "succinctProperties": {
                "cmis:objectId": "doc-1;1.1",
                "cmis:baseTypeId": "cmis:document",
                "cmis:name": "report.txt",
                "cmis:versionSeriesId": "doc-1",
                "cmis:versionLabel": "1.1",
                "cmis:isLatestVersion": true,
                "cmis:versionSeriesCheckedOutId": null,
                "cmis:contentStreamLength": 42,
                "cmis:contentStreamMimeType": "text/plain",
                "cmis:creationDate": 1700000000000i64
            },
            "allowableActions": {
                "canCheckOut": true,
                "canSetContentStream": false,
                "canApplyPolicy": true
            }
        }));

        let document = data.into_remote().unwrap().into_document().unwrap();
        assert_eq!(document.id, "doc-1;1.1");
        assert_eq!(document.version_series_id, "doc-1");
        assert_eq!(document.effective_version_label(), "1.1");
        assert_eq!(document.content_length, 42);
        assert!(!document.is_checked_out());
        assert_eq!(
            document.created_at.map(|d| d.timestamp_millis()),
            Some(1700000000000)
        );
        assert!(document.allowable_actions.contains(Action::CanCheckOut));
        assert!(!document.allowable_actions.contains(Action::CanSetContentStream));
    }

    #[test]
    fn test_folder_and_unknown_base_type() {
        let folder = object(json!({
            "succinctProperties": {
                "cmis:objectId": "f-1",
                "cmis:baseTypeId": "cmis:folder",
                "cmis:name": "Reports",
                "cmis:parentId": "root"
            }
        }))
        .into_remote()
        .unwrap()
        .into_folder()
        .unwrap();
        assert_eq!(folder.parent_id.as_deref(), Some("root"));
        assert!(folder.allowable_actions.iter().next().is_none());

        let err = object(json!({
            "succinctProperties": {
                "cmis:objectId": "p-1",
                "cmis:baseTypeId": "cmis:policy",
                "cmis:name": "p"
            }
        }))
        .into_remote()
        .unwrap_err();
        assert!(matches!(err, RemoteError::Runtime(_)));
    }

    #[test]
    fn test_query_row_values() {
        let row = object(json!({
            "succinctProperties": {
                "cmis:objectId": "doc-1",
                "cmis:secondaryObjectTypeIds": ["a", "b"]
            }
        }))
        .into_query_row();

        assert_eq!(row.first_value(PROPERTY_OBJECT_ID), Some("doc-1"));
        assert_eq!(row.first_value("cmis:secondaryObjectTypeIds"), Some("a"));
    }
}
