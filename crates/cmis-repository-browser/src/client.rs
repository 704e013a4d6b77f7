//! CMIS 1.1 Browser Binding client.
//!
//! Reads are `GET`s against the repository or root folder URL with a
//! `cmisselector`; writes are form `POST`s carrying a `cmisaction`. Every
//! request authenticates with HTTP basic auth and asks for succinct
//! properties. Non-2xx responses are mapped to [`RemoteError`] from the status
//! code and the binding's `exception` name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cmis_repository_core::{
    ConnectionFactory, ContentStream, Properties, QueryRow, RemoteDocument, RemoteError,
    RemoteFolder, RemoteObject, RemoteSession, RepositoryInfo,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::wire::{
    decode, ChildrenPage, ErrorBody, ObjectData, ObjectInFolder, QueryPage, RepositoryEntry,
    ServiceDocument,
};

/// Page size used when walking children and query results.
const PAGE_SIZE: usize = 100;

/// Connection settings for one Browser Binding endpoint.
#[derive(Debug, Clone)]
pub struct BrowserBindingParams {
    /// Browser Binding service URL, e.g.
    /// `http://host/alfresco/api/-default-/public/cmis/versions/1.1/browser`
    pub url: String,
    /// Remote repository to bind to; the first advertised one when unset
    pub repository_id: Option<String>,
    pub username: String,
    pub password: String,
    /// Timeout applied to every HTTP request
    pub timeout: Duration,
}

#[derive(Clone)]
struct HttpAuth {
    http: Client,
    username: String,
    password: String,
}

impl HttpAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

// =============================================================================
// Connection factory
// =============================================================================

/// Opens [`BrowserSession`]s against one Browser Binding endpoint.
pub struct BrowserConnectionFactory {
    params: BrowserBindingParams,
    auth: HttpAuth,
}

impl BrowserConnectionFactory {
    pub fn new(params: BrowserBindingParams) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(params.timeout)
            .build()
            .map_err(transport_error)?;

        let auth = HttpAuth {
            http,
            username: params.username.clone(),
            password: params.password.clone(),
        };
        Ok(Self { params, auth })
    }

    pub fn params(&self) -> &BrowserBindingParams {
        &self.params
    }

    fn select_repository(
        &self,
        mut repositories: ServiceDocument,
    ) -> Result<RepositoryEntry, RemoteError> {
        match &self.params.repository_id {
            Some(id) => repositories
                .remove(id)
                .ok_or_else(|| RemoteError::ObjectNotFound(format!("repository {}", id))),
            None => repositories
                .into_values()
                .next()
                .ok_or_else(|| {
                    RemoteError::Runtime("No repository advertised by the service".to_string())
                }),
        }
    }
}

#[async_trait]
impl ConnectionFactory for BrowserConnectionFactory {
    #[instrument(skip(self), level = "debug")]
    async fn open_session(&self, context_id: &str) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let request = self.auth.authorize(self.auth.http.get(&self.params.url));
        let body = read_json(request).await?;
        let entry = self.select_repository(decode(body)?)?;

        debug!(
            "Opened browser binding session for {} on repository {}",
            context_id, entry.repository_id
        );

        Ok(Arc::new(BrowserSession {
            auth: self.auth.clone(),
            info: entry.info(),
            repository_url: entry.repository_url,
            root_url: entry.root_folder_url,
            unauthorized: AtomicBool::new(false),
        }))
    }

    fn login(&self) -> Result<String, RemoteError> {
        Ok(self.params.username.clone())
    }

    fn supported_configurations(&self) -> Vec<String> {
        vec!["browser".to_string()]
    }

    fn supported_parameters(&self) -> Vec<Vec<String>> {
        vec![vec![
            "url".to_string(),
            "repositoryId".to_string(),
            "username".to_string(),
            "password".to_string(),
        ]]
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session bound to one remote repository.
pub struct BrowserSession {
    auth: HttpAuth,
    info: RepositoryInfo,
    repository_url: String,
    root_url: String,
    /// Set once the server rejects the credentials
    unauthorized: AtomicBool,
}

impl BrowserSession {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, RemoteError> {
        let request = self
            .auth
            .authorize(self.auth.http.get(url))
            .query(&[("succinct", "true"), ("includeAllowableActions", "true")])
            .query(query);
        self.observe(read_json(request).await)
    }

    async fn get_object_data(
        &self,
        object_id: &str,
        extra: &[(&str, &str)],
    ) -> Result<ObjectData, RemoteError> {
        let mut query = vec![("cmisselector", "object"), ("objectId", object_id)];
        query.extend_from_slice(extra);
        decode(self.get(&self.root_url, &query).await?)
    }

    async fn post_form(&self, fields: Vec<(String, String)>) -> Result<Value, RemoteError> {
        let request = self.auth.authorize(self.auth.http.post(&self.root_url)).form(&fields);
        self.observe(read_json(request).await)
    }

    async fn post_multipart(
        &self,
        fields: Vec<(String, String)>,
        content: Option<ContentStream>,
    ) -> Result<Value, RemoteError> {
        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name, value);
        }
        if let Some(content) = content {
            form = form.part("content", content_part(content)?);
        }

        let request = self.auth.authorize(self.auth.http.post(&self.root_url)).multipart(form);
        self.observe(read_json(request).await)
    }

    fn observe<T>(&self, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        if let Err(RemoteError::Runtime(message)) = &result {
            if message.starts_with(UNAUTHORIZED) {
                self.unauthorized.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    async fn object_action(
        &self,
        action: &str,
        object_id: &str,
        extra: &[(&str, &str)],
    ) -> Result<Value, RemoteError> {
        let mut fields = form_fields(action, object_id);
        fields.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self.post_form(fields).await
    }
}

#[async_trait]
impl RemoteSession for BrowserSession {
    fn is_usable(&self) -> bool {
        !self.unauthorized.load(Ordering::SeqCst)
    }

    async fn repository_info(&self) -> Result<RepositoryInfo, RemoteError> {
        Ok(self.info.clone())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_object(&self, object_id: &str) -> Result<RemoteObject, RemoteError> {
        self.get_object_data(object_id, &[]).await?.into_remote()
    }

    async fn get_parent_ids(&self, object_id: &str) -> Result<Vec<String>, RemoteError> {
        let query = [("cmisselector", "parents"), ("objectId", object_id)];
        let parents: Vec<ObjectInFolder> = decode(self.get(&self.root_url, &query).await?)?;
        parents.iter().map(|p| p.object.object_id()).collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_children(&self, folder_id: &str) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut children = Vec::new();
        loop {
            let skip = children.len().to_string();
            let page_size = PAGE_SIZE.to_string();
            let query = [
                ("cmisselector", "children"),
                ("objectId", folder_id),
                ("maxItems", page_size.as_str()),
                ("skipCount", skip.as_str()),
            ];
            let page: ChildrenPage = decode(self.get(&self.root_url, &query).await?)?;

            let received = page.objects.len();
            for child in page.objects {
                children.push(child.object.into_remote()?);
            }
            if !page.has_more_items || received == 0 {
                break;
            }
        }
        Ok(children)
    }

    #[instrument(skip(self), level = "debug")]
    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, RemoteError> {
        let mut rows = Vec::new();
        loop {
            let skip = rows.len().to_string();
            let page_size = PAGE_SIZE.to_string();
            let query = [
                ("cmisselector", "query"),
                ("q", statement),
                ("searchAllVersions", "false"),
                ("maxItems", page_size.as_str()),
                ("skipCount", skip.as_str()),
            ];
            let page: QueryPage = decode(self.get(&self.repository_url, &query).await?)?;

            let received = page.results.len();
            rows.extend(page.results.into_iter().map(ObjectData::into_query_row));
            if !page.has_more_items || received == 0 {
                break;
            }
        }
        Ok(rows)
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<RemoteFolder, RemoteError> {
        let mut fields = form_fields("createFolder", parent_id);
        push_properties(&mut fields, [("cmis:objectTypeId", "cmis:folder"), ("cmis:name", name)]);
        let data: ObjectData = decode(self.post_form(fields).await?)?;
        data.into_folder()
    }

    #[instrument(skip(self, content), level = "debug")]
    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content: ContentStream,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut fields = form_fields("createDocument", parent_id);
        push_properties(&mut fields, [("cmis:objectTypeId", "cmis:document"), ("cmis:name", name)]);
        fields.push(("versioningState".to_string(), "major".to_string()));

        let data: ObjectData = decode(self.post_multipart(fields, Some(content)).await?)?;
        data.into_document()
    }

    async fn copy_document(
        &self,
        document_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut fields = form_fields("createDocumentFromSource", target_folder_id);
        fields.push(("sourceId".to_string(), document_id.to_string()));
        fields.push(("versioningState".to_string(), "major".to_string()));
        let data: ObjectData = decode(self.post_form(fields).await?)?;
        data.into_document()
    }

    async fn move_object(
        &self,
        object_id: &str,
        source_folder_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteObject, RemoteError> {
        let body = self
            .object_action(
                "move",
                object_id,
                &[("sourceFolderId", source_folder_id), ("targetFolderId", target_folder_id)],
            )
            .await?;
        decode::<ObjectData>(body)?.into_remote()
    }

    async fn update_properties(
        &self,
        object_id: &str,
        properties: &Properties,
    ) -> Result<RemoteObject, RemoteError> {
        let mut fields = form_fields("update", object_id);
        push_properties(&mut fields, properties.iter());
        decode::<ObjectData>(self.post_form(fields).await?)?.into_remote()
    }

    async fn set_content_stream(
        &self,
        document_id: &str,
        content: ContentStream,
        overwrite: bool,
    ) -> Result<(), RemoteError> {
        let mut fields = form_fields("setContent", document_id);
        fields.push(("overwriteFlag".to_string(), overwrite.to_string()));
        self.post_multipart(fields, Some(content)).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_content_stream(&self, document_id: &str) -> Result<ContentStream, RemoteError> {
        let request = self
            .auth
            .authorize(self.auth.http.get(&self.root_url))
            .query(&[("cmisselector", "content"), ("objectId", document_id)]);
        let response = self.observe(send(request).await)?;

        let mime_type = header(&response, reqwest::header::CONTENT_TYPE);
        let file_name = header(&response, reqwest::header::CONTENT_DISPOSITION)
            .as_deref()
            .and_then(disposition_file_name)
            .unwrap_or_else(|| document_id.to_string());
        let data: Bytes = response.bytes().await.map_err(transport_error)?;

        debug!("Read {} bytes of {}", data.len(), document_id);
        Ok(ContentStream::new(file_name, mime_type, data))
    }

    async fn get_all_versions(
        &self,
        version_series_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let query = [("cmisselector", "versions"), ("objectId", version_series_id)];
        let versions: Vec<ObjectData> = decode(self.get(&self.root_url, &query).await?)?;
        versions.into_iter().map(ObjectData::into_document).collect()
    }

    async fn get_latest_version(
        &self,
        version_series_id: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        self.get_object_data(version_series_id, &[("returnVersion", "latest")])
            .await?
            .into_document()
    }

    async fn check_out(&self, document_id: &str) -> Result<String, RemoteError> {
        let body = self.object_action("checkOut", document_id, &[]).await?;
        decode::<ObjectData>(body)?.object_id()
    }

    #[instrument(skip(self, properties, content), level = "debug")]
    async fn check_in(
        &self,
        working_copy_id: &str,
        major: bool,
        properties: Option<&Properties>,
        content: Option<ContentStream>,
        comment: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut fields = form_fields("checkIn", working_copy_id);
        fields.push(("major".to_string(), major.to_string()));
        fields.push(("checkinComment".to_string(), comment.to_string()));
        if let Some(properties) = properties {
            push_properties(&mut fields, properties.iter());
        }

        let body = self.post_multipart(fields, content).await?;
        decode::<ObjectData>(body)?.into_document()
    }

    async fn cancel_check_out(&self, working_copy_id: &str) -> Result<(), RemoteError> {
        self.object_action("cancelCheckOut", working_copy_id, &[]).await?;
        Ok(())
    }

    async fn delete_all_versions(&self, document_id: &str) -> Result<(), RemoteError> {
        self.object_action("delete", document_id, &[("allVersions", "true")])
            .await?;
        Ok(())
    }

    async fn delete_tree(&self, folder_id: &str) -> Result<(), RemoteError> {
        let body = self
            .object_action(
                "deleteTree",
                folder_id,
                &[
                    ("allVersions", "true"),
                    ("unfileObjects", "delete"),
                    ("continueOnFailure", "false"),
                ],
            )
            .await?;

        // A successful deleteTree answers with an empty body; anything else
        // lists the objects it could not delete.
        match body {
            Value::Null => Ok(()),
            Value::Object(map) if map.is_empty() => Ok(()),
            other => Err(RemoteError::Constraint(format!(
                "Unable to delete folder {} completely: {}",
                folder_id, other
            ))),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

const UNAUTHORIZED: &str = "Unauthorized";

fn form_fields(action: &str, object_id: &str) -> Vec<(String, String)> {
    vec![
        ("cmisaction".to_string(), action.to_string()),
        ("objectId".to_string(), object_id.to_string()),
        ("succinct".to_string(), "true".to_string()),
    ]
}

fn push_properties<'a>(
    fields: &mut Vec<(String, String)>,
    properties: impl IntoIterator<Item = (&'a str, &'a str)>,
) {
    for (index, (id, value)) in properties.into_iter().enumerate() {
        fields.push((format!("propertyId[{}]", index), id.to_string()));
        fields.push((format!("propertyValue[{}]", index), value.to_string()));
    }
}

fn content_part(content: ContentStream) -> Result<Part, RemoteError> {
    let mime_type = content
        .mime_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Part::bytes(content.data.to_vec())
        .file_name(content.file_name)
        .mime_str(&mime_type)
        .map_err(|e| RemoteError::Runtime(format!("Invalid content type {}: {}", mime_type, e)))
}

fn header(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `attachment; filename="report.txt"` -> `report.txt`
fn disposition_file_name(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Connection(error.to_string())
}

async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = status_error(status, &body);
    warn!("CMIS request failed with {}: {}", status, error);
    Err(error)
}

async fn read_json(request: RequestBuilder) -> Result<Value, RemoteError> {
    let response = send(request).await?;
    let body = response.text().await.map_err(transport_error)?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| RemoteError::Runtime(format!("Malformed CMIS response: {}", e)))
}

/// Map a failed response onto the CMIS exception families.
pub fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.trim().to_string()
    } else {
        parsed.message
    };

    match parsed.exception.as_str() {
        "permissionDenied" => return RemoteError::PermissionDenied(message),
        "objectNotFound" => return RemoteError::ObjectNotFound(message),
        "updateConflict" | "versioning" => return RemoteError::UpdateConflict(message),
        "constraint"
        | "nameConstraintViolation"
        | "contentAlreadyExists"
        | "streamNotSupported" => return RemoteError::Constraint(message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Runtime(format!("{}: {}", UNAUTHORIZED, message)),
        StatusCode::FORBIDDEN => RemoteError::PermissionDenied(message),
        StatusCode::NOT_FOUND => RemoteError::ObjectNotFound(message),
        StatusCode::CONFLICT => RemoteError::Constraint(message),
        _ => RemoteError::Runtime(format!("CMIS request failed with {}: {}", status, message)),
    }
}
