//! Browser Binding client against a mocked CMIS server.

use std::sync::Arc;
use std::time::Duration;

use cmis_repository::{CmisRepository, ErrorKind, RepositoryConfig};
use cmis_repository_browser::{BrowserBindingParams, BrowserConnectionFactory};
use cmis_repository_core::{
    Action, ConnectionFactory, ContentStream, Properties, RemoteError, RemoteObject, RemoteSession,
};
use cmis_repository_local::{AtomicIdCounter, InMemoryMappingStore, StaticHostFolders};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPOSITORY: &str = "A1";
/// base64("admin:secret")
const BASIC_AUTH: &str = "Basic YWRtaW46c2VjcmV0";

fn params(server: &MockServer) -> BrowserBindingParams {
    BrowserBindingParams {
        url: format!("{}/browser", server.uri()),
        repository_id: None,
        username: "admin".to_string(),
        password: "secret".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn root_path() -> String {
    format!("/browser/{}/root", REPOSITORY)
}

async fn setup() -> (MockServer, Arc<dyn RemoteSession>) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/browser"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "A1": {
                "repositoryId": REPOSITORY,
                "repositoryName": "Main Repository",
                "rootFolderId": "root-id",
                "productName": "Mock CMIS",
                "repositoryUrl": format!("{}/browser/{}", server.uri(), REPOSITORY),
                "rootFolderUrl": format!("{}/browser/{}/root", server.uri(), REPOSITORY)
            }
        })))
        .mount(&server)
        .await;

    let factory = BrowserConnectionFactory::new(params(&server)).unwrap();
    let session = factory.open_session("test").await.unwrap();
    (server, session)
}

fn folder_json(id: &str, name: &str, parent_id: Option<&str>) -> Value {
    json!({
        "succinctProperties": {
            "cmis:objectId": id,
            "cmis:baseTypeId": "cmis:folder",
            "cmis:name": name,
            "cmis:parentId": parent_id
        },
        "allowableActions": { "canCreateDocument": true, "canGetChildren": true }
    })
}

fn document_json(id: &str, series: &str, name: &str, label: &str) -> Value {
    json!({
        "succinctProperties": {
            "cmis:objectId": id,
            "cmis:baseTypeId": "cmis:document",
            "cmis:name": name,
            "cmis:versionSeriesId": series,
            "cmis:versionLabel": label,
            "cmis:isLatestVersion": true,
            "cmis:contentStreamLength": 3
        },
        "allowableActions": { "canCheckOut": true, "canUpdateProperties": true }
    })
}

#[tokio::test]
async fn test_open_session_reads_repository_info() {
    let (_server, session) = setup().await;

    let info = session.repository_info().await.unwrap();
    assert_eq!(info.id, REPOSITORY);
    assert_eq!(info.root_folder_id, "root-id");
    assert_eq!(info.product_name.as_deref(), Some("Mock CMIS"));
    assert!(session.is_usable());
}

#[tokio::test]
async fn test_unknown_repository_id() {
    let (server, _session) = setup().await;
    let mut params = params(&server);
    params.repository_id = Some("missing".to_string());

    let factory = BrowserConnectionFactory::new(params).unwrap();
    let err = factory.open_session("test").await.err().unwrap();
    assert!(matches!(err, RemoteError::ObjectNotFound(_)));
    assert_eq!(factory.login().unwrap(), "admin");
}

#[tokio::test]
async fn test_get_object_document() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "object"))
        .and(query_param("objectId", "doc-1;1.0"))
        .and(query_param("succinct", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document_json("doc-1;1.0", "doc-1", "a.txt", "1.0")),
        )
        .mount(&server)
        .await;

    let object = session.get_object("doc-1;1.0").await.unwrap();
    let RemoteObject::Document(document) = object else {
        panic!("expected a document");
    };
    assert_eq!(document.version_series_id, "doc-1");
    assert_eq!(document.name, "a.txt");
    assert!(document.allowable_actions.contains(Action::CanCheckOut));
}

#[tokio::test]
async fn test_latest_version_lookup() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "object"))
        .and(query_param("objectId", "doc-1"))
        .and(query_param("returnVersion", "latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document_json("doc-1;2.0", "doc-1", "a.txt", "2.0")),
        )
        .mount(&server)
        .await;

    let document = session.get_latest_version("doc-1").await.unwrap();
    assert_eq!(document.effective_version_label(), "2.0");
}

#[tokio::test]
async fn test_children_are_paged() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "children"))
        .and(query_param("skipCount", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [{ "object": folder_json("f-1", "Reports", Some("root-id")) }],
            "hasMoreItems": true,
            "numItems": 2
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "children"))
        .and(query_param("skipCount", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [{ "object": document_json("doc-1;1.0", "doc-1", "a.txt", "1.0") }],
            "hasMoreItems": false,
            "numItems": 2
        })))
        .mount(&server)
        .await;

    let children = session.get_children("root-id").await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name(), "Reports");
    assert_eq!(children[1].mapped_id(), "doc-1");
}

#[tokio::test]
async fn test_query_rows() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("/browser/{}", REPOSITORY)))
        .and(query_param("cmisselector", "query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "succinctProperties": { "cmis:objectId": "doc-1" } }],
            "hasMoreItems": false
        })))
        .mount(&server)
        .await;

    let rows = session
        .query("SELECT cmis:objectId FROM cmis:document WHERE cmis:name = 'a.txt'")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].first_value("cmis:objectId"), Some("doc-1"));
}

#[tokio::test]
async fn test_create_folder_posts_action() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path(root_path()))
        .and(body_string_contains("cmisaction=createFolder"))
        .and(body_string_contains("objectId=root-id"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(folder_json("f-9", "New", Some("root-id"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let folder = session.create_folder("root-id", "New").await.unwrap();
    assert_eq!(folder.id, "f-9");
    assert_eq!(folder.parent_id.as_deref(), Some("root-id"));
}

#[tokio::test]
async fn test_update_and_content_round() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path(root_path()))
        .and(body_string_contains("cmisaction=update"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document_json("doc-1;1.0", "doc-1", "b.txt", "1.0")),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "content"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"b.txt\"")
                .set_body_raw("abc", "text/plain"),
        )
        .mount(&server)
        .await;

    let updated = session
        .update_properties("doc-1;1.0", &Properties::with_name("b.txt"))
        .await
        .unwrap();
    assert_eq!(updated.name(), "b.txt");

    let content: ContentStream = session.get_content_stream("doc-1;1.0").await.unwrap();
    assert_eq!(content.file_name, "b.txt");
    assert_eq!(content.mime_type.as_deref(), Some("text/plain"));
    assert_eq!(&content.data[..], b"abc");
}

#[tokio::test]
async fn test_error_statuses() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("objectId", "missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "exception": "objectNotFound",
            "message": "missing"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(root_path()))
        .and(body_string_contains("cmisaction=checkOut"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "exception": "updateConflict",
            "message": "already checked out"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(root_path()))
        .and(body_string_contains("cmisaction=delete"))
        .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
        .mount(&server)
        .await;

    let err = session.get_object("missing").await.unwrap_err();
    assert_eq!(err, RemoteError::ObjectNotFound("missing".to_string()));

    let err = session.check_out("doc-1;1.0").await.unwrap_err();
    assert!(matches!(err, RemoteError::UpdateConflict(_)));

    let err = session.delete_all_versions("doc-1;1.0").await.unwrap_err();
    assert_eq!(err, RemoteError::PermissionDenied("nope".to_string()));
    assert!(session.is_usable());
}

#[tokio::test]
async fn test_unauthorized_marks_session_unusable() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let err = session.get_object("doc-1").await.unwrap_err();
    assert!(err.to_string().contains("Unauthorized"));
    assert!(!session.is_usable());
}

#[tokio::test]
async fn test_adapter_over_browser_binding() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "A1": {
                "repositoryId": REPOSITORY,
                "repositoryName": "Main Repository",
                "rootFolderId": "root-id",
                "repositoryUrl": format!("{}/browser/{}", server.uri(), REPOSITORY),
                "rootFolderUrl": format!("{}/browser/{}/root", server.uri(), REPOSITORY)
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "object"))
        .and(query_param("objectId", "root-id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(folder_json("root-id", "Root", None)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(root_path()))
        .and(query_param("cmisselector", "children"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "exception": "permissionDenied",
            "message": "denied"
        })))
        .mount(&server)
        .await;

    let repo = CmisRepository::new(
        RepositoryConfig::new(7),
        Arc::new(BrowserConnectionFactory::new(params(&server)).unwrap()),
        Arc::new(InMemoryMappingStore::new()),
        Arc::new(AtomicIdCounter::starting_at(100)),
        Arc::new(StaticHostFolders::new().with_mount_point(1)),
    );
    let context = repo.open_context("alice");
    let scope = repo.begin_request(&context);

    let root = repo.get_folder(&scope, 1).await.unwrap();
    assert_eq!(root.folder_id, 1);
    assert_eq!(root.remote_id(), "root-id");
    assert!(root.is_root());

    let err = repo
        .get_file_entries(&scope, 1, None, cmis_repository::Page::All)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(err.to_string(), "Unable to login with user admin");
    assert!(repo.sessions().is_empty());
}
