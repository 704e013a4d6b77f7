//! In-memory CMIS-like remote store.
//!
//! Folder ids look like `f-N`, version series ids like `d-N`, version ids like
//! `d-N;1.0` and private working copies like `d-N;pwc`. Lookups by series id
//! resolve to the latest version. Children keep insertion order.
//!
//! The store can be told to hand out new ids on move or rename, to deny
//! actions, and to fail a named operation once. Every remote call is counted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cmis_repository_core::{
    Action, AllowableActions, ConnectionFactory, ContentStream, NameQuery, Properties,
    QueryObjectType, QueryRow, RemoteDocument, RemoteError, RemoteFolder, RemoteObject,
    RemoteSession, RepositoryInfo, DEFAULT_VERSION_LABEL, PROPERTY_OBJECT_ID,
};
use tracing::debug;

const REPOSITORY_ID: &str = "in-memory";
const ROOT_FOLDER_ID: &str = "f-0";
const WORKING_COPY_SUFFIX: &str = ";pwc";

#[derive(Debug, Clone)]
enum ChildRef {
    Folder(String),
    Document(String),
}

#[derive(Debug, Clone)]
struct FolderNode {
    id: String,
    name: String,
    parent_id: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    children: Vec<ChildRef>,
}

#[derive(Debug, Clone)]
struct VersionNode {
    label: String,
    name: String,
    content: Bytes,
    mime_type: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct WorkingCopy {
    name: String,
    content: Bytes,
    mime_type: Option<String>,
}

#[derive(Debug, Clone)]
struct SeriesNode {
    id: String,
    parent_id: String,
    /// Oldest first
    versions: Vec<VersionNode>,
    working_copy: Option<WorkingCopy>,
}

impl SeriesNode {
    fn version_id(&self, label: &str) -> String {
        format!("{};{}", self.id, label)
    }

    fn working_copy_id(&self) -> String {
        format!("{}{}", self.id, WORKING_COPY_SUFFIX)
    }

    fn latest(&self) -> Option<&VersionNode> {
        self.versions.last()
    }
}

#[derive(Debug)]
struct StoreState {
    next_id: u64,
    folders: HashMap<String, FolderNode>,
    series: HashMap<String, SeriesNode>,
    versionable: bool,
    reassign_on_move: bool,
    reassign_folder_on_rename: bool,
    denied: HashMap<String, BTreeSet<Action>>,
    failures: HashMap<String, RemoteError>,
    stalls: BTreeSet<String>,
    calls: BTreeMap<String, usize>,
}

impl StoreState {
    fn new() -> Self {
        let now = Utc::now();
        let mut folders = HashMap::new();
        folders.insert(
            ROOT_FOLDER_ID.to_string(),
            FolderNode {
                id: ROOT_FOLDER_ID.to_string(),
                name: "Root".to_string(),
                parent_id: None,
                created_at: now,
                modified_at: now,
                children: Vec::new(),
            },
        );

        Self {
            next_id: 1,
            folders,
            series: HashMap::new(),
            versionable: true,
            reassign_on_move: false,
            reassign_folder_on_rename: false,
            denied: HashMap::new(),
            failures: HashMap::new(),
            stalls: BTreeSet::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Count the call and fire a pending injected failure.
    fn enter(&mut self, op: &str) -> Result<(), RemoteError> {
        *self.calls.entry(op.to_string()).or_insert(0) += 1;
        match self.failures.remove(op) {
            Some(error) => {
                debug!("Injected failure for {}: {}", op, error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn mint(&mut self, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, self.next_id);
        self.next_id += 1;
        id
    }

    fn folder(&self, id: &str) -> Result<&FolderNode, RemoteError> {
        self.folders
            .get(id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))
    }

    fn folder_mut(&mut self, id: &str) -> Result<&mut FolderNode, RemoteError> {
        self.folders
            .get_mut(id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))
    }

    /// Resolve a series id, version id or working copy id to its series id
    /// and the version label it designates (`None` for the latest or the
    /// working copy).
    fn locate_document(&self, id: &str) -> Option<(String, Option<String>)> {
        if self.series.contains_key(id) {
            return Some((id.to_string(), None));
        }

        let (series_id, label) = id.split_once(';')?;
        let series = self.series.get(series_id)?;

        if id.ends_with(WORKING_COPY_SUFFIX) {
            return series.working_copy.as_ref().map(|_| (series_id.to_string(), None));
        }

        series
            .versions
            .iter()
            .any(|v| v.label == label)
            .then(|| (series_id.to_string(), Some(label.to_string())))
    }

    fn series_of(&self, id: &str) -> Result<&SeriesNode, RemoteError> {
        let (series_id, _) = self
            .locate_document(id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))?;
        self.series
            .get(&series_id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))
    }

    fn series_mut(&mut self, id: &str) -> Result<&mut SeriesNode, RemoteError> {
        let (series_id, _) = self
            .locate_document(id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))?;
        self.series
            .get_mut(&series_id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))
    }

    fn denied_for(&self, ids: &[&str]) -> BTreeSet<Action> {
        ids.iter()
            .filter_map(|id| self.denied.get(*id))
            .flatten()
            .copied()
            .collect()
    }

    fn folder_object(&self, folder: &FolderNode) -> RemoteFolder {
        let denied = self.denied_for(&[folder.id.as_str()]);
        let allowable_actions = [
            Action::CanGetProperties,
            Action::CanUpdateProperties,
            Action::CanGetChildren,
            Action::CanCreateDocument,
            Action::CanCreateFolder,
            Action::CanMoveObject,
            Action::CanDeleteObject,
            Action::CanDeleteTree,
        ]
        .into_iter()
        .filter(|a| !denied.contains(a))
        .collect();

        RemoteFolder {
            id: folder.id.clone(),
            name: folder.name.clone(),
            parent_id: folder.parent_id.clone(),
            path: Some(self.path_of(folder)),
            created_at: Some(folder.created_at),
            modified_at: Some(folder.modified_at),
            allowable_actions,
        }
    }

    fn path_of(&self, folder: &FolderNode) -> String {
        let mut names = Vec::new();
        let mut current = Some(folder);
        while let Some(node) = current {
            if node.parent_id.is_none() {
                break;
            }
            names.push(node.name.as_str());
            current = node.parent_id.as_deref().and_then(|id| self.folders.get(id));
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn document_object(&self, series: &SeriesNode, version: &VersionNode) -> RemoteDocument {
        let latest_label = series.latest().map(|v| v.label.as_str());
        let is_latest_version = latest_label == Some(version.label.as_str());
        let version_id = series.version_id(&version.label);
        let checked_out = series.working_copy.is_some();

        let denied = self.denied_for(&[series.id.as_str(), version_id.as_str()]);
        let mut actions: AllowableActions = [
            Action::CanGetProperties,
            Action::CanUpdateProperties,
            Action::CanGetContentStream,
            Action::CanSetContentStream,
            Action::CanMoveObject,
            Action::CanDeleteObject,
            Action::CanGetAllVersions,
        ]
        .into_iter()
        .collect();
        if self.versionable && !checked_out {
            actions.insert(Action::CanCheckOut);
        }
        if checked_out {
            actions.insert(Action::CanCancelCheckOut);
            actions.insert(Action::CanCheckIn);
        }
        for action in denied {
            actions.remove(action);
        }

        RemoteDocument {
            id: version_id,
            version_series_id: series.id.clone(),
            name: version.name.clone(),
            version_label: Some(version.label.clone()),
            is_latest_version,
            checked_out_id: checked_out.then(|| series.working_copy_id()),
            content_length: version.content.len() as u64,
            mime_type: version.mime_type.clone(),
            created_at: Some(version.created_at),
            modified_at: Some(version.modified_at),
            allowable_actions: actions,
        }
    }

    fn latest_object(&self, series: &SeriesNode) -> Result<RemoteDocument, RemoteError> {
        series
            .latest()
            .map(|v| self.document_object(series, v))
            .ok_or_else(|| RemoteError::Runtime(format!("Series {} has no versions", series.id)))
    }

    fn object(&self, id: &str) -> Result<RemoteObject, RemoteError> {
        if let Some(folder) = self.folders.get(id) {
            return Ok(RemoteObject::Folder(self.folder_object(folder)));
        }

        let (series_id, label) = self
            .locate_document(id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))?;
        let series = self
            .series
            .get(&series_id)
            .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))?;

        let document = match label {
            Some(label) => series
                .versions
                .iter()
                .find(|v| v.label == label)
                .map(|v| self.document_object(series, v))
                .ok_or_else(|| RemoteError::ObjectNotFound(id.to_string()))?,
            None => self.latest_object(series)?,
        };
        Ok(RemoteObject::Document(document))
    }

    fn child_object(&self, child: &ChildRef) -> Result<RemoteObject, RemoteError> {
        match child {
            ChildRef::Folder(id) => Ok(RemoteObject::Folder(self.folder_object(self.folder(id)?))),
            ChildRef::Document(id) => {
                let series = self
                    .series
                    .get(id)
                    .ok_or_else(|| RemoteError::ObjectNotFound(id.clone()))?;
                Ok(RemoteObject::Document(self.latest_object(series)?))
            }
        }
    }

    fn detach(&mut self, parent_id: &str, child_id: &str) -> Result<(), RemoteError> {
        let parent = self.folder_mut(parent_id)?;
        parent.children.retain(|c| match c {
            ChildRef::Folder(id) | ChildRef::Document(id) => id != child_id,
        });
        parent.modified_at = Utc::now();
        Ok(())
    }

    fn attach(&mut self, parent_id: &str, child: ChildRef) -> Result<(), RemoteError> {
        let parent = self.folder_mut(parent_id)?;
        parent.children.push(child);
        parent.modified_at = Utc::now();
        Ok(())
    }

    fn is_within(&self, folder_id: &str, ancestor_id: &str) -> bool {
        let mut current = Some(folder_id.to_string());
        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            current = self.folders.get(&id).and_then(|f| f.parent_id.clone());
        }
        false
    }

    /// Give a folder a new id, rewiring its parent and children.
    fn reassign_folder(&mut self, old_id: &str) -> Result<String, RemoteError> {
        let new_id = self.mint("f");
        let mut folder = self
            .folders
            .remove(old_id)
            .ok_or_else(|| RemoteError::ObjectNotFound(old_id.to_string()))?;
        folder.id = new_id.clone();

        if let Some(parent_id) = folder.parent_id.clone() {
            let parent = self.folder_mut(&parent_id)?;
            for child in parent.children.iter_mut() {
                if matches!(&*child, ChildRef::Folder(id) if id == old_id) {
                    *child = ChildRef::Folder(new_id.clone());
                }
            }
        }

        for child in &folder.children {
            match child {
                ChildRef::Folder(id) => {
                    if let Some(sub) = self.folders.get_mut(id) {
                        sub.parent_id = Some(new_id.clone());
                    }
                }
                ChildRef::Document(id) => {
                    if let Some(series) = self.series.get_mut(id) {
                        series.parent_id = new_id.clone();
                    }
                }
            }
        }

        self.folders.insert(new_id.clone(), folder);
        Ok(new_id)
    }

    /// Give a version series a new id, rewiring its parent.
    fn reassign_series(&mut self, old_id: &str) -> Result<String, RemoteError> {
        let new_id = self.mint("d");
        let mut series = self
            .series
            .remove(old_id)
            .ok_or_else(|| RemoteError::ObjectNotFound(old_id.to_string()))?;
        series.id = new_id.clone();

        let parent = self.folder_mut(&series.parent_id)?;
        for child in parent.children.iter_mut() {
            if matches!(&*child, ChildRef::Document(id) if id == old_id) {
                *child = ChildRef::Document(new_id.clone());
            }
        }

        if let Some(denied) = self.denied.remove(old_id) {
            self.denied.insert(new_id.clone(), denied);
        }
        self.series.insert(new_id.clone(), series);
        Ok(new_id)
    }

    fn remove_folder_tree(&mut self, folder_id: &str) {
        let mut pending = vec![folder_id.to_string()];
        while let Some(id) = pending.pop() {
            if let Some(folder) = self.folders.remove(&id) {
                for child in folder.children {
                    match child {
                        ChildRef::Folder(sub) => pending.push(sub),
                        ChildRef::Document(series) => {
                            self.series.remove(&series);
                        }
                    }
                }
            }
        }
    }
}

fn next_label(current: &str, major: bool) -> String {
    let (major_part, minor_part) = current.split_once('.').unwrap_or((current, "0"));
    let major_number: u32 = major_part.parse().unwrap_or(1);
    let minor_number: u32 = minor_part.parse().unwrap_or(0);

    if major {
        format!("{}.0", major_number + 1)
    } else {
        format!("{}.{}", major_number, minor_number + 1)
    }
}

/// Shared in-memory remote store. Clones see the same contents.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("in-memory store poisoned")
    }

    /// Whether documents support check-out. Non-versionable documents are
    /// updated in place.
    pub fn with_versionable(self, versionable: bool) -> Self {
        self.state().versionable = versionable;
        self
    }

    /// Hand out a new id whenever an object is moved.
    pub fn with_reassign_on_move(self, reassign: bool) -> Self {
        self.state().reassign_on_move = reassign;
        self
    }

    /// Hand out a new folder id whenever a folder is renamed.
    pub fn with_reassign_folder_on_rename(self, reassign: bool) -> Self {
        self.state().reassign_folder_on_rename = reassign;
        self
    }

    pub fn root_folder_id(&self) -> String {
        ROOT_FOLDER_ID.to_string()
    }

    /// Remove an action from an object's allowable actions. For documents,
    /// `object_id` may be the series id or a version id.
    pub fn deny_action(&self, object_id: &str, action: Action) {
        self.state()
            .denied
            .entry(object_id.to_string())
            .or_default()
            .insert(action);
    }

    /// Make the next call of `op` (a `RemoteSession` method name, or
    /// `open_session`) fail with `error`.
    pub fn inject_failure(&self, op: &str, error: RemoteError) {
        self.state().failures.insert(op.to_string(), error);
    }

    /// Make the next call of `op` never complete. Honoured by `check_in`.
    pub fn stall_next(&self, op: &str) {
        self.state().stalls.insert(op.to_string());
    }

    /// Number of calls made to `op` so far.
    pub fn call_count(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Whether the series behind a series or version id holds a working copy.
    pub fn is_checked_out(&self, id: &str) -> bool {
        self.state()
            .series_of(id)
            .map(|s| s.working_copy.is_some())
            .unwrap_or(false)
    }

    /// Whether an object (folder, series or version) exists.
    pub fn exists(&self, id: &str) -> bool {
        self.state().object(id).is_ok()
    }

    async fn stall_point(&self, op: &str) {
        let stalled = self.state().stalls.remove(op);
        if stalled {
            debug!("Stalling {}", op);
            std::future::pending::<()>().await;
        }
    }

    fn enter(&self, op: &str) -> Result<MutexGuard<'_, StoreState>, RemoteError> {
        let mut state = self.state();
        state.enter(op)?;
        Ok(state)
    }
}

/// Session over an [`InMemoryStore`].
pub struct InMemorySession {
    store: InMemoryStore,
    revoked: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteSession for InMemorySession {
    fn is_usable(&self) -> bool {
        !self.revoked.load(Ordering::SeqCst)
    }

    async fn repository_info(&self) -> Result<RepositoryInfo, RemoteError> {
        self.store.enter("repository_info")?;
        Ok(RepositoryInfo {
            id: REPOSITORY_ID.to_string(),
            name: "In-memory repository".to_string(),
            root_folder_id: ROOT_FOLDER_ID.to_string(),
            product_name: Some(env!("CARGO_PKG_NAME").to_string()),
        })
    }

    async fn get_object(&self, object_id: &str) -> Result<RemoteObject, RemoteError> {
        self.store.enter("get_object")?.object(object_id)
    }

    async fn get_parent_ids(&self, object_id: &str) -> Result<Vec<String>, RemoteError> {
        let state = self.store.enter("get_parent_ids")?;
        if let Some(folder) = state.folders.get(object_id) {
            return Ok(folder.parent_id.iter().cloned().collect());
        }
        Ok(vec![state.series_of(object_id)?.parent_id.clone()])
    }

    async fn get_children(&self, folder_id: &str) -> Result<Vec<RemoteObject>, RemoteError> {
        let state = self.store.enter("get_children")?;
        state
            .folder(folder_id)?
            .children
            .iter()
            .map(|child| state.child_object(child))
            .collect()
    }

    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, RemoteError> {
        let state = self.store.enter("query")?;
        let query = NameQuery::parse(statement)
            .ok_or_else(|| RemoteError::Runtime(format!("Unsupported query: {}", statement)))?;

        let Some(folder) = state.folders.get(&query.folder_id) else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for child in &folder.children {
            let object = state.child_object(child)?;
            let matches_type = matches!(
                (&object, query.object_type),
                (RemoteObject::Folder(_), QueryObjectType::Folder)
                    | (RemoteObject::Document(_), QueryObjectType::Document)
            );
            if matches_type && object.name() == query.name {
                let mut row = QueryRow::new();
                row.insert(PROPERTY_OBJECT_ID, vec![object.id().to_string()]);
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<RemoteFolder, RemoteError> {
        let mut state = self.store.enter("create_folder")?;
        state.folder(parent_id)?;

        let id = state.mint("f");
        let now = Utc::now();
        state.folders.insert(
            id.clone(),
            FolderNode {
                id: id.clone(),
                name: name.to_string(),
                parent_id: Some(parent_id.to_string()),
                created_at: now,
                modified_at: now,
                children: Vec::new(),
            },
        );
        state.attach(parent_id, ChildRef::Folder(id.clone()))?;

        let folder = state.folder(&id)?;
        Ok(state.folder_object(folder))
    }

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content: ContentStream,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut state = self.store.enter("create_document")?;
        state.folder(parent_id)?;

        let id = state.mint("d");
        let now = Utc::now();
        state.series.insert(
            id.clone(),
            SeriesNode {
                id: id.clone(),
                parent_id: parent_id.to_string(),
                versions: vec![VersionNode {
                    label: DEFAULT_VERSION_LABEL.to_string(),
                    name: name.to_string(),
                    content: content.data,
                    mime_type: content.mime_type,
                    created_at: now,
                    modified_at: now,
                }],
                working_copy: None,
            },
        );
        state.attach(parent_id, ChildRef::Document(id.clone()))?;

        let series = state.series_of(&id)?;
        state.latest_object(series)
    }

    async fn copy_document(
        &self,
        document_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut state = self.store.enter("copy_document")?;
        state.folder(target_folder_id)?;

        let source = state
            .series_of(document_id)?
            .latest()
            .cloned()
            .ok_or_else(|| RemoteError::ObjectNotFound(document_id.to_string()))?;

        let id = state.mint("d");
        let now = Utc::now();
        state.series.insert(
            id.clone(),
            SeriesNode {
                id: id.clone(),
                parent_id: target_folder_id.to_string(),
                versions: vec![VersionNode {
                    label: DEFAULT_VERSION_LABEL.to_string(),
                    created_at: now,
                    modified_at: now,
                    ..source
                }],
                working_copy: None,
            },
        );
        state.attach(target_folder_id, ChildRef::Document(id.clone()))?;

        let series = state.series_of(&id)?;
        state.latest_object(series)
    }

    async fn move_object(
        &self,
        object_id: &str,
        source_folder_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteObject, RemoteError> {
        let mut state = self.store.enter("move_object")?;
        state.folder(target_folder_id)?;

        if state.folders.contains_key(object_id) {
            let parent_id = state.folder(object_id)?.parent_id.clone();
            if parent_id.as_deref() != Some(source_folder_id) {
                return Err(RemoteError::Constraint(format!(
                    "{} is not filed in {}",
                    object_id, source_folder_id
                )));
            }
            if state.is_within(target_folder_id, object_id) {
                return Err(RemoteError::Constraint(format!(
                    "Cannot move {} into its own subtree",
                    object_id
                )));
            }

            state.detach(source_folder_id, object_id)?;
            state.folder_mut(object_id)?.parent_id = Some(target_folder_id.to_string());
            state.attach(target_folder_id, ChildRef::Folder(object_id.to_string()))?;

            let id = if state.reassign_on_move {
                state.reassign_folder(object_id)?
            } else {
                object_id.to_string()
            };
            return state.object(&id);
        }

        let series_id = state.series_of(object_id)?.id.clone();
        if state.series_of(object_id)?.parent_id != source_folder_id {
            return Err(RemoteError::Constraint(format!(
                "{} is not filed in {}",
                object_id, source_folder_id
            )));
        }

        state.detach(source_folder_id, &series_id)?;
        state.series_mut(&series_id)?.parent_id = target_folder_id.to_string();
        state.attach(target_folder_id, ChildRef::Document(series_id.clone()))?;

        let id = if state.reassign_on_move {
            state.reassign_series(&series_id)?
        } else {
            series_id
        };
        state.object(&id)
    }

    async fn update_properties(
        &self,
        object_id: &str,
        properties: &Properties,
    ) -> Result<RemoteObject, RemoteError> {
        let mut state = self.store.enter("update_properties")?;
        let Some(name) = properties.name().map(str::to_string) else {
            return state.object(object_id);
        };

        if state.folders.contains_key(object_id) {
            let folder = state.folder_mut(object_id)?;
            folder.name = name;
            folder.modified_at = Utc::now();

            let id = if state.reassign_folder_on_rename {
                state.reassign_folder(object_id)?
            } else {
                object_id.to_string()
            };
            return state.object(&id);
        }

        let series = state.series_mut(object_id)?;
        if series.working_copy.is_some() {
            return Err(RemoteError::UpdateConflict(format!("{} is checked out", object_id)));
        }
        let series_id = series.id.clone();
        if let Some(latest) = series.versions.last_mut() {
            latest.name = name;
            latest.modified_at = Utc::now();
        }
        state.object(&series_id)
    }

    async fn set_content_stream(
        &self,
        document_id: &str,
        content: ContentStream,
        overwrite: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.store.enter("set_content_stream")?;
        let series = state.series_mut(document_id)?;

        if series.working_copy.is_some() {
            return Err(RemoteError::UpdateConflict(format!("{} is checked out", document_id)));
        }

        let latest = series
            .versions
            .last_mut()
            .ok_or_else(|| RemoteError::ObjectNotFound(document_id.to_string()))?;
        if !overwrite && !latest.content.is_empty() {
            return Err(RemoteError::Constraint(format!("{} already has content", document_id)));
        }
        latest.content = content.data;
        latest.mime_type = content.mime_type.or(latest.mime_type.take());
        latest.modified_at = Utc::now();
        Ok(())
    }

    async fn get_content_stream(&self, document_id: &str) -> Result<ContentStream, RemoteError> {
        let state = self.store.enter("get_content_stream")?;
        let series = state.series_of(document_id)?;

        if document_id.ends_with(WORKING_COPY_SUFFIX) {
            if let Some(pwc) = &series.working_copy {
                return Ok(ContentStream::new(
                    pwc.name.clone(),
                    pwc.mime_type.clone(),
                    pwc.content.clone(),
                ));
            }
        }

        let version = match state.locate_document(document_id) {
            Some((_, Some(label))) => series.versions.iter().find(|v| v.label == label),
            _ => series.latest(),
        }
        .ok_or_else(|| RemoteError::ObjectNotFound(document_id.to_string()))?;

        Ok(ContentStream::new(
            version.name.clone(),
            version.mime_type.clone(),
            version.content.clone(),
        ))
    }

    async fn get_all_versions(
        &self,
        version_series_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let state = self.store.enter("get_all_versions")?;
        let series = state.series_of(version_series_id)?;
        Ok(series
            .versions
            .iter()
            .rev()
            .map(|v| state.document_object(series, v))
            .collect())
    }

    async fn get_latest_version(
        &self,
        version_series_id: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        let state = self.store.enter("get_latest_version")?;
        let series = state.series_of(version_series_id)?;
        state.latest_object(series)
    }

    async fn check_out(&self, document_id: &str) -> Result<String, RemoteError> {
        let mut state = self.store.enter("check_out")?;
        if !state.versionable {
            return Err(RemoteError::Constraint(format!("{} is not versionable", document_id)));
        }

        let series = state.series_mut(document_id)?;
        if series.working_copy.is_some() {
            return Err(RemoteError::UpdateConflict(format!(
                "{} is already checked out",
                document_id
            )));
        }

        let latest = series
            .latest()
            .cloned()
            .ok_or_else(|| RemoteError::ObjectNotFound(document_id.to_string()))?;
        series.working_copy = Some(WorkingCopy {
            name: latest.name,
            content: latest.content,
            mime_type: latest.mime_type,
        });
        Ok(series.working_copy_id())
    }

    async fn check_in(
        &self,
        working_copy_id: &str,
        major: bool,
        properties: Option<&Properties>,
        content: Option<ContentStream>,
        comment: &str,
    ) -> Result<RemoteDocument, RemoteError> {
        self.store.stall_point("check_in").await;
        let mut state = self.store.enter("check_in")?;
        let series = state.series_mut(working_copy_id)?;

        let pwc = series
            .working_copy
            .take()
            .ok_or_else(|| RemoteError::ObjectNotFound(working_copy_id.to_string()))?;

        let name = properties.and_then(Properties::name).map(str::to_string);
        if name.is_some() || content.is_some() || major {
            let current = series
                .latest()
                .map(|v| v.label.clone())
                .unwrap_or_else(|| DEFAULT_VERSION_LABEL.to_string());
            let now = Utc::now();
            let (data, mime_type) = match content {
                Some(content) => (content.data, content.mime_type.or(pwc.mime_type)),
                None => (pwc.content, pwc.mime_type),
            };

            series.versions.push(VersionNode {
                label: next_label(&current, major),
                name: name.unwrap_or(pwc.name),
                content: data,
                mime_type,
                created_at: now,
                modified_at: now,
            });
            debug!("Checked in {} ({})", working_copy_id, comment);
        }

        let series_id = series.id.clone();
        let series = state.series_of(&series_id)?;
        state.latest_object(series)
    }

    async fn cancel_check_out(&self, working_copy_id: &str) -> Result<(), RemoteError> {
        let mut state = self.store.enter("cancel_check_out")?;
        let series = state.series_mut(working_copy_id)?;
        series
            .working_copy
            .take()
            .map(|_| ())
            .ok_or_else(|| RemoteError::ObjectNotFound(working_copy_id.to_string()))
    }

    async fn delete_all_versions(&self, document_id: &str) -> Result<(), RemoteError> {
        let mut state = self.store.enter("delete_all_versions")?;
        let series = state.series_of(document_id)?;
        let (series_id, parent_id) = (series.id.clone(), series.parent_id.clone());

        state.detach(&parent_id, &series_id)?;
        state.series.remove(&series_id);
        Ok(())
    }

    async fn delete_tree(&self, folder_id: &str) -> Result<(), RemoteError> {
        let mut state = self.store.enter("delete_tree")?;
        let folder = state.folder(folder_id)?;

        let Some(parent_id) = folder.parent_id.clone() else {
            return Err(RemoteError::Constraint("Cannot delete the root folder".to_string()));
        };

        state.detach(&parent_id, folder_id)?;
        state.remove_folder_tree(folder_id);
        Ok(())
    }
}

/// Opens [`InMemorySession`]s over one store.
pub struct InMemoryConnectionFactory {
    store: InMemoryStore,
    login: Option<String>,
    opened: AtomicUsize,
    issued: Mutex<Vec<Arc<AtomicBool>>>,
}

impl InMemoryConnectionFactory {
    pub fn new(store: InMemoryStore, login: impl Into<String>) -> Self {
        Self {
            store,
            login: Some(login.into()),
            opened: AtomicUsize::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Factory whose login identity cannot be looked up.
    pub fn without_login(store: InMemoryStore) -> Self {
        Self {
            login: None,
            ..Self::new(store, "")
        }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Mark every session opened so far as unusable.
    pub fn revoke_sessions(&self) {
        let issued = self.issued.lock().expect("session list poisoned");
        for revoked in issued.iter() {
            revoked.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryConnectionFactory {
    async fn open_session(&self, context_id: &str) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        self.store.enter("open_session")?;

        let revoked = Arc::new(AtomicBool::new(false));
        self.issued
            .lock()
            .expect("session list poisoned")
            .push(Arc::clone(&revoked));
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Opened in-memory session for {}", context_id);

        Ok(Arc::new(InMemorySession {
            store: self.store.clone(),
            revoked,
        }))
    }

    fn login(&self) -> Result<String, RemoteError> {
        self.login
            .clone()
            .ok_or_else(|| RemoteError::Runtime("No login configured".to_string()))
    }

    fn supported_configurations(&self) -> Vec<String> {
        vec!["in-memory".to_string()]
    }

    fn supported_parameters(&self) -> Vec<Vec<String>> {
        vec![Vec::new()]
    }
}
