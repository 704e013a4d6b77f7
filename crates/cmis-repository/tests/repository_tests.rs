//! End-to-end tests of the repository adapter against the in-memory store.

use std::sync::Arc;

use bytes::Bytes;
use cmis_repository::{
    CmisRepository, DeleteDepth, DocumentChange, EntityKind, ErrorKind, FileEntry, OrderBy,
    OrderField, Page, RepositoryConfig, RepositoryEntity, RepositoryError, RequestScope,
    UserContext,
};
use cmis_repository_core::{Action, ContentStream, LocalId, RemoteError};
use cmis_repository_local::{
    AtomicIdCounter, InMemoryConnectionFactory, InMemoryMappingStore, InMemoryStore,
    StaticHostFolders,
};

const MOUNT: LocalId = 1;
const REPOSITORY_ID: i64 = 42;

struct Fixture {
    repo: CmisRepository,
    store: InMemoryStore,
    mappings: Arc<InMemoryMappingStore>,
    context: UserContext,
}

impl Fixture {
    fn scope(&self) -> RequestScope {
        self.repo.begin_request(&self.context)
    }
}

fn setup() -> Fixture {
    setup_with(InMemoryStore::new(), DeleteDepth::None)
}

fn setup_with(store: InMemoryStore, delete_depth: DeleteDepth) -> Fixture {
    let factory = Arc::new(InMemoryConnectionFactory::new(store.clone(), "admin"));
    let mappings = Arc::new(InMemoryMappingStore::new());

    let repo = CmisRepository::new(
        RepositoryConfig::new(REPOSITORY_ID).with_delete_depth(delete_depth),
        factory,
        mappings.clone(),
        Arc::new(AtomicIdCounter::starting_at(1000)),
        Arc::new(StaticHostFolders::new().with_mount_point(MOUNT)),
    );
    let context = repo.open_context("alice");

    Fixture {
        repo,
        store,
        mappings,
        context,
    }
}

fn text(data: &str) -> ContentStream {
    ContentStream::new("upload.txt", Some("text/plain".to_string()), Bytes::from(data.to_string()))
}

async fn add(fixture: &Fixture, folder_id: LocalId, title: &str, data: &str) -> FileEntry {
    fixture
        .repo
        .add_file_entry(&fixture.scope(), folder_id, title, text(data))
        .await
        .unwrap()
}

async fn read(fixture: &Fixture, file_entry_id: LocalId) -> String {
    let content = fixture
        .repo
        .get_content_stream(&fixture.scope(), file_entry_id, None)
        .await
        .unwrap();
    String::from_utf8(content.data.to_vec()).unwrap()
}

fn titles(entries: &[FileEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.title()).collect()
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test]
async fn test_init_and_mount_point() {
    let fixture = setup();
    let scope = fixture.scope();

    let info = fixture.repo.init_repository(&scope).await.unwrap();
    assert_eq!(info.root_folder_id, fixture.store.root_folder_id());

    let root = fixture.repo.get_folder(&scope, MOUNT).await.unwrap();
    assert_eq!(root.folder_id, MOUNT);
    assert_eq!(root.repository_id, REPOSITORY_ID);
    assert!(root.is_root());
    assert_eq!(root.parent_folder_id, None);
}

#[tokio::test]
async fn test_local_ids_round_trip() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    let scope = fixture.scope();

    let fetched = fixture.repo.get_file_entry(&scope, entry.file_entry_id).await.unwrap();
    assert_eq!(fetched.file_entry_id, entry.file_entry_id);
    assert_eq!(fetched.uuid, entry.uuid);
    assert_eq!(fetched.folder_id, Some(MOUNT));

    let by_uuid = fixture.repo.get_file_entry_by_uuid(&scope, &entry.uuid).await.unwrap();
    assert_eq!(by_uuid.file_entry_id, entry.file_entry_id);

    let by_title = fixture
        .repo
        .get_file_entry_by_title(&scope, MOUNT, "a.txt")
        .await
        .unwrap();
    assert_eq!(by_title.file_entry_id, entry.file_entry_id);

    let remote_id = fixture
        .repo
        .identifiers()
        .resolve_remote_id(entry.file_entry_id, EntityKind::FileEntry)
        .await
        .unwrap();
    let (local_id, uuid) = fixture
        .repo
        .identifiers()
        .resolve_local_id(&remote_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((local_id, uuid), (entry.file_entry_id, entry.uuid));
}

#[tokio::test]
async fn test_unknown_entities_not_found() {
    let fixture = setup();
    let scope = fixture.scope();

    let err = fixture.repo.get_file_entry(&scope, 555).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: EntityKind::FileEntry, .. }));

    let err = fixture.repo.get_file_entry_by_uuid(&scope, "nope").await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: EntityKind::FileEntry, .. }));

    let err = fixture
        .repo
        .get_file_entry_by_title(&scope, MOUNT, "missing.txt")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = fixture.repo.get_folder(&scope, 777).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: EntityKind::Folder, .. }));
}

#[tokio::test]
async fn test_move_file_entry_repoints_mapping() {
    let fixture = setup_with(InMemoryStore::new().with_reassign_on_move(true), DeleteDepth::None);
    let target = fixture
        .repo
        .add_folder(&fixture.scope(), MOUNT, "target")
        .await
        .unwrap();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;

    let moved = fixture
        .repo
        .move_file_entry(&fixture.scope(), entry.file_entry_id, target.folder_id)
        .await
        .unwrap();

    assert_eq!(moved.file_entry_id, entry.file_entry_id);
    assert_eq!(moved.uuid, entry.uuid);
    assert_eq!(moved.folder_id, Some(target.folder_id));
    assert_ne!(moved.version_series_id(), entry.version_series_id());

    let remote_id = fixture
        .repo
        .identifiers()
        .resolve_remote_id(entry.file_entry_id, EntityKind::FileEntry)
        .await
        .unwrap();
    assert_eq!(remote_id, moved.version_series_id());

    let listed = fixture
        .repo
        .get_file_entries(&fixture.scope(), target.folder_id, None, Page::All)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_entry_id, entry.file_entry_id);
    assert_eq!(read(&fixture, entry.file_entry_id).await, "one");
}

#[tokio::test]
async fn test_move_file_entry_into_same_folder_is_noop() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;

    let moved = fixture
        .repo
        .move_file_entry(&fixture.scope(), entry.file_entry_id, MOUNT)
        .await
        .unwrap();
    assert_eq!(moved.version_series_id(), entry.version_series_id());
    assert_eq!(fixture.store.call_count("move_object"), 0);
}

#[tokio::test]
async fn test_folder_rename_and_move_repoint() {
    let fixture = setup_with(
        InMemoryStore::new().with_reassign_folder_on_rename(true),
        DeleteDepth::None,
    );
    let scope = fixture.scope();
    let folder = fixture.repo.add_folder(&scope, MOUNT, "old").await.unwrap();
    add(&fixture, folder.folder_id, "a.txt", "one").await;

    let renamed = fixture
        .repo
        .update_folder(&fixture.scope(), folder.folder_id, "new")
        .await
        .unwrap();
    assert_eq!(renamed.folder_id, folder.folder_id);
    assert_eq!(renamed.uuid, folder.uuid);
    assert_eq!(renamed.name(), "new");
    assert_ne!(renamed.remote_id(), folder.remote_id());

    let entries = fixture
        .repo
        .get_file_entries(&fixture.scope(), folder.folder_id, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&entries), vec!["a.txt"]);

    let other = fixture.repo.add_folder(&fixture.scope(), MOUNT, "other").await.unwrap();
    let moved = fixture
        .repo
        .move_folder(&fixture.scope(), folder.folder_id, other.folder_id)
        .await
        .unwrap();
    assert_eq!(moved.folder_id, folder.folder_id);
    assert_eq!(moved.parent_folder_id, Some(other.folder_id));

    // Moving into the current parent does nothing.
    let again = fixture
        .repo
        .move_folder(&fixture.scope(), folder.folder_id, other.folder_id)
        .await
        .unwrap();
    assert_eq!(again.remote_id(), moved.remote_id());
    assert_eq!(fixture.store.call_count("move_object"), 1);
}

#[tokio::test]
async fn test_root_folder_cannot_move() {
    let fixture = setup();
    let folder = fixture.repo.add_folder(&fixture.scope(), MOUNT, "sub").await.unwrap();

    let err = fixture
        .repo
        .move_folder(&fixture.scope(), MOUNT, folder.folder_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepositoryFault);
    assert!(err.to_string().contains("Cannot move CMIS root folder"));
}

// =============================================================================
// Listings
// =============================================================================

#[tokio::test]
async fn test_listing_snapshot_within_scope() {
    let fixture = setup();
    add(&fixture, MOUNT, "a.txt", "one").await;

    let scope = fixture.scope();
    let first = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    // Another user adds a document in a separate request.
    let bob = fixture.repo.open_context("bob");
    let other_scope = fixture.repo.begin_request(&bob);
    fixture
        .repo
        .add_file_entry(&other_scope, MOUNT, "b.txt", text("two"))
        .await
        .unwrap();

    let second = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(
        fixture.repo.get_file_entries_count(&scope, MOUNT).await.unwrap(),
        1
    );
    assert_eq!(fixture.store.call_count("get_children"), 1);
    drop(scope);

    let fresh = fixture
        .repo
        .get_file_entries(&fixture.scope(), MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&fresh), vec!["a.txt", "b.txt"]);
    assert_eq!(fixture.store.call_count("get_children"), 2);
}

#[tokio::test]
async fn test_own_mutations_refresh_listing() {
    let fixture = setup();
    let a = add(&fixture, MOUNT, "a.txt", "one").await;

    let scope = fixture.scope();
    let listed = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&listed), vec!["a.txt"]);

    fixture
        .repo
        .add_file_entry(&scope, MOUNT, "b.txt", text("two"))
        .await
        .unwrap();
    let listed = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&listed), vec!["a.txt", "b.txt"]);

    fixture
        .repo
        .delete_file_entry(&scope, a.file_entry_id)
        .await
        .unwrap();
    let listed = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&listed), vec!["b.txt"]);
}

#[tokio::test]
async fn test_listing_order_and_pagination() {
    let fixture = setup();
    for title in ["c.txt", "A.txt", "b.txt"] {
        add(&fixture, MOUNT, title, title).await;
    }
    fixture.repo.add_folder(&fixture.scope(), MOUNT, "docs").await.unwrap();

    let scope = fixture.scope();
    let native = fixture
        .repo
        .get_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&native), vec!["c.txt", "A.txt", "b.txt"]);

    let asc = fixture
        .repo
        .get_file_entries(&scope, MOUNT, Some(OrderBy::name(true)), Page::All)
        .await
        .unwrap();
    assert_eq!(titles(&asc), vec!["A.txt", "b.txt", "c.txt"]);

    let desc = fixture
        .repo
        .get_file_entries(&scope, MOUNT, Some(OrderBy::name(false)), Page::from_bounds(0, 2))
        .await
        .unwrap();
    assert_eq!(titles(&desc), vec!["c.txt", "b.txt"]);

    let by_size = fixture
        .repo
        .get_file_entries(&scope, MOUNT, Some(OrderBy::new(OrderField::Size, true)), Page::All)
        .await
        .unwrap();
    assert_eq!(by_size.len(), 3);

    let everything = fixture
        .repo
        .get_folders_and_file_entries(&scope, MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(everything.len(), 4);
    assert!(matches!(everything[3], RepositoryEntity::Folder(_)));

    assert_eq!(fixture.repo.get_folders_count(&scope, MOUNT).await.unwrap(), 1);
    assert_eq!(
        fixture
            .repo
            .get_folders_and_file_entries_count(&scope, MOUNT)
            .await
            .unwrap(),
        4
    );
    assert_eq!(fixture.store.call_count("get_children"), 1);
}

#[tokio::test]
async fn test_subfolder_ids_pre_order() {
    let fixture = setup();
    let scope = fixture.scope();
    let a = fixture.repo.add_folder(&scope, MOUNT, "a").await.unwrap();
    let a1 = fixture.repo.add_folder(&scope, a.folder_id, "a1").await.unwrap();
    let a2 = fixture.repo.add_folder(&scope, a.folder_id, "a2").await.unwrap();
    let b = fixture.repo.add_folder(&scope, MOUNT, "b").await.unwrap();
    add(&fixture, a1.folder_id, "x.txt", "x").await;
    add(&fixture, b.folder_id, "y.txt", "y").await;

    let scope = fixture.scope();
    let all = fixture.repo.get_subfolder_ids(&scope, MOUNT, true).await.unwrap();
    assert_eq!(all, vec![a.folder_id, a1.folder_id, a2.folder_id, b.folder_id]);

    let direct = fixture.repo.get_subfolder_ids(&scope, MOUNT, false).await.unwrap();
    assert_eq!(direct, vec![a.folder_id, b.folder_id]);

    let count = fixture
        .repo
        .get_folders_file_entries_count(&scope, &[a1.folder_id, a2.folder_id, b.folder_id])
        .await
        .unwrap();
    assert_eq!(count, 2);
}

// =============================================================================
// Name collisions
// =============================================================================

#[tokio::test]
async fn test_duplicate_names_rejected() {
    let fixture = setup();
    add(&fixture, MOUNT, "report.txt", "one").await;
    fixture.repo.add_folder(&fixture.scope(), MOUNT, "Reports").await.unwrap();
    let scope = fixture.scope();

    let err = fixture
        .repo
        .add_file_entry(&scope, MOUNT, "report.txt", text("two"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::DuplicateName { entity: EntityKind::FileEntry, .. }
    ));

    let err = fixture
        .repo
        .add_file_entry(&scope, MOUNT, "Reports", text("two"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::DuplicateName { entity: EntityKind::Folder, .. }
    ));

    let err = fixture.repo.add_folder(&scope, MOUNT, "report.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);

    fixture
        .repo
        .add_file_entry(&scope, MOUNT, "other.txt", text("three"))
        .await
        .unwrap();
    assert_eq!(fixture.store.call_count("create_document"), 2);
}

#[tokio::test]
async fn test_copy_file_entry() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    let dest = fixture.repo.add_folder(&fixture.scope(), MOUNT, "dest").await.unwrap();

    let copy = fixture
        .repo
        .copy_file_entry(&fixture.scope(), entry.file_entry_id, dest.folder_id)
        .await
        .unwrap();
    assert_ne!(copy.file_entry_id, entry.file_entry_id);
    assert_eq!(copy.title(), "a.txt");
    assert_eq!(copy.folder_id, Some(dest.folder_id));
    assert_eq!(read(&fixture, copy.file_entry_id).await, "one");

    let err = fixture
        .repo
        .copy_file_entry(&fixture.scope(), entry.file_entry_id, MOUNT)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
}

// =============================================================================
// Updates, checkout and revert
// =============================================================================

#[tokio::test]
async fn test_update_file_entry() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    add(&fixture, MOUNT, "taken.txt", "x").await;

    let updated = fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new()
                .with_title("b.txt")
                .with_content(text("two"))
                .with_change_log("edit"),
        )
        .await
        .unwrap();
    assert_eq!(updated.file_entry_id, entry.file_entry_id);
    assert_eq!(updated.title(), "b.txt");
    assert_eq!(updated.version(), "1.1");
    assert_eq!(read(&fixture, entry.file_entry_id).await, "two");

    let err = fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new().with_title("taken.txt"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
}

#[tokio::test]
async fn test_update_without_checkout_support() {
    let fixture = setup_with(InMemoryStore::new().with_versionable(false), DeleteDepth::None);
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;

    let updated = fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new().with_title("b.txt").with_content(text("two")),
        )
        .await
        .unwrap();
    assert_eq!(updated.title(), "b.txt");
    assert_eq!(read(&fixture, entry.file_entry_id).await, "two");
    assert_eq!(fixture.store.call_count("check_out"), 0);
}

#[tokio::test]
async fn test_disallowed_update_leaves_document_untouched() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    fixture
        .store
        .deny_action(entry.version_series_id(), Action::CanSetContentStream);

    let err = fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new().with_content(text("two")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(!err.is_authentication_required());
    assert!(!fixture.store.is_checked_out(entry.version_series_id()));
    assert_eq!(fixture.store.call_count("check_out"), 0);
    assert_eq!(read(&fixture, entry.file_entry_id).await, "one");
}

#[tokio::test]
async fn test_failed_check_in_cancels_checkout() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    fixture
        .store
        .inject_failure("check_in", RemoteError::Constraint("storage quota exceeded".to_string()));

    let err = fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new().with_content(text("two")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RepositoryFault);
    assert_eq!(fixture.store.call_count("check_out"), 1);
    assert_eq!(fixture.store.call_count("cancel_check_out"), 1);
    assert!(!fixture.store.is_checked_out(entry.version_series_id()));
    assert_eq!(read(&fixture, entry.file_entry_id).await, "one");
}

#[tokio::test]
async fn test_revert_restores_historical_version() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;

    fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new()
                .with_title("b.txt")
                .with_content(text("two"))
                .major(true),
        )
        .await
        .unwrap();

    let scope = fixture.scope();
    let reverted = fixture
        .repo
        .revert_file_entry(&scope, entry.file_entry_id, "1.0")
        .await
        .unwrap();
    assert_eq!(reverted.file_entry_id, entry.file_entry_id);
    assert_eq!(reverted.title(), "a.txt");
    assert_eq!(reverted.version(), "3.0");

    let fetched = fixture.repo.get_file_entry(&scope, entry.file_entry_id).await.unwrap();
    assert_eq!(fetched.title(), "a.txt");
    assert_eq!(fetched.version(), "3.0");
    assert_eq!(read(&fixture, entry.file_entry_id).await, "one");

    let err = fixture
        .repo
        .revert_file_entry(&scope, entry.file_entry_id, "7.0")
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: EntityKind::FileVersion, .. }));
}

#[tokio::test]
async fn test_file_versions() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    fixture
        .repo
        .update_file_entry(
            &fixture.scope(),
            entry.file_entry_id,
            DocumentChange::new().with_content(text("two")),
        )
        .await
        .unwrap();

    let scope = fixture.scope();
    let versions = fixture
        .repo
        .get_file_versions(&scope, entry.file_entry_id)
        .await
        .unwrap();
    let labels: Vec<&str> = versions.iter().map(|v| v.version()).collect();
    assert_eq!(labels, vec!["1.1", "1.0"]);

    let first = fixture
        .repo
        .get_file_version(&scope, versions[1].file_version_id)
        .await
        .unwrap();
    assert_eq!(first.version(), "1.0");
    assert_eq!(first.file_entry_id, Some(entry.file_entry_id));

    let old = fixture
        .repo
        .get_content_stream(&scope, entry.file_entry_id, Some("1.0"))
        .await
        .unwrap();
    assert_eq!(old.data, Bytes::from("one"));
}

// =============================================================================
// Locks
// =============================================================================

#[tokio::test]
async fn test_lock_and_unlock() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;

    let locked = fixture
        .repo
        .lock_file_entry(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap();
    assert!(locked.is_checked_out());
    assert!(fixture.store.is_checked_out(entry.version_series_id()));

    let unlocked = fixture
        .repo
        .unlock_file_entry_with_lock(&fixture.scope(), entry.file_entry_id, "token")
        .await
        .unwrap();
    assert!(!unlocked.is_checked_out());
    assert_eq!(unlocked.version(), "1.0");

    let again = fixture
        .repo
        .unlock_file_entry(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap();
    assert_eq!(again.version(), "1.0");
}

#[tokio::test]
async fn test_lock_denied_without_checkout() {
    let fixture = setup();
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    fixture
        .store
        .deny_action(entry.version_series_id(), Action::CanCheckOut);

    let err = fixture
        .repo
        .lock_file_entry(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_unsupported_lock_operations() {
    let fixture = setup();
    let repo = &fixture.repo;

    for result in [
        repo.lock_folder(MOUNT),
        repo.lock_folder_with_owner(MOUNT, "alice"),
        repo.unlock_folder(MOUNT, "token"),
        repo.refresh_folder_lock("token"),
        repo.verify_inheritable_lock(MOUNT, "token"),
        repo.lock_file_entry_with_owner(5, "alice"),
        repo.refresh_file_entry_lock("token"),
        repo.verify_file_entry_lock(5, "token"),
    ] {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnsupportedOperation);
    }
}

// =============================================================================
// Deletion
// =============================================================================

async fn build_tree(fixture: &Fixture) -> (LocalId, LocalId, FileEntry) {
    let scope = fixture.scope();
    let top = fixture.repo.add_folder(&scope, MOUNT, "top").await.unwrap();
    let sub = fixture.repo.add_folder(&scope, top.folder_id, "sub").await.unwrap();
    let entry = add(fixture, sub.folder_id, "a.txt", "one").await;
    (top.folder_id, sub.folder_id, entry)
}

#[tokio::test]
async fn test_delete_folder_keeps_mappings_without_delete_depth() {
    let fixture = setup_with(InMemoryStore::new(), DeleteDepth::None);
    let (top, _, _) = build_tree(&fixture).await;
    assert_eq!(fixture.mappings.len(), 4);

    fixture.repo.delete_folder(&fixture.scope(), top).await.unwrap();
    assert_eq!(fixture.mappings.len(), 4);

    let err = fixture.repo.get_folder(&fixture.scope(), top).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: EntityKind::Folder, .. }));
}

#[tokio::test]
async fn test_delete_folder_shallow_removes_own_mapping() {
    let fixture = setup_with(InMemoryStore::new(), DeleteDepth::Shallow);
    let (top, sub, entry) = build_tree(&fixture).await;

    fixture.repo.delete_folder(&fixture.scope(), top).await.unwrap();

    let local_ids: Vec<LocalId> = fixture.mappings.rows().iter().map(|m| m.local_id).collect();
    assert_eq!(local_ids.len(), 3);
    assert!(!local_ids.contains(&top));
    assert!(local_ids.contains(&sub));
    assert!(local_ids.contains(&entry.file_entry_id));
}

#[tokio::test]
async fn test_delete_folder_deep_removes_subtree_mappings() {
    let fixture = setup_with(InMemoryStore::new(), DeleteDepth::Deep);
    let (top, _, entry) = build_tree(&fixture).await;
    fixture
        .repo
        .get_file_versions(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap();

    fixture.repo.delete_folder(&fixture.scope(), top).await.unwrap();

    let local_ids: Vec<LocalId> = fixture.mappings.rows().iter().map(|m| m.local_id).collect();
    assert_eq!(local_ids, vec![MOUNT]);
}

#[tokio::test]
async fn test_delete_file_entry() {
    let fixture = setup_with(InMemoryStore::new(), DeleteDepth::Shallow);
    let entry = add(&fixture, MOUNT, "a.txt", "one").await;
    fixture
        .repo
        .get_file_versions(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap();
    assert_eq!(fixture.mappings.len(), 3);

    let scope = fixture.scope();
    assert_eq!(fixture.repo.get_file_entries_count(&scope, MOUNT).await.unwrap(), 1);
    fixture.repo.delete_file_entry(&scope, entry.file_entry_id).await.unwrap();
    assert_eq!(fixture.repo.get_file_entries_count(&scope, MOUNT).await.unwrap(), 0);

    let local_ids: Vec<LocalId> = fixture.mappings.rows().iter().map(|m| m.local_id).collect();
    assert_eq!(local_ids, vec![MOUNT]);

    let err = fixture
        .repo
        .get_file_entry(&fixture.scope(), entry.file_entry_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Sessions and faults
// =============================================================================

#[tokio::test]
async fn test_authorization_failure_invalidates_session() {
    let fixture = setup();
    fixture.repo.init_repository(&fixture.scope()).await.unwrap();
    assert_eq!(fixture.repo.sessions().len(), 1);

    fixture
        .store
        .inject_failure("get_children", RemoteError::PermissionDenied("forbidden".to_string()));

    let err = fixture
        .repo
        .get_folders(&fixture.scope(), MOUNT, None, Page::All)
        .await
        .unwrap_err();
    assert!(err.is_authentication_required());
    assert_eq!(err.to_string(), "Unable to login with user admin");
    assert!(fixture.repo.sessions().is_empty());

    // The next request opens a fresh session.
    fixture
        .repo
        .get_folders(&fixture.scope(), MOUNT, None, Page::All)
        .await
        .unwrap();
    assert_eq!(fixture.store.call_count("open_session"), 2);
}

#[tokio::test]
async fn test_constraint_naming_authorized_file_keeps_session() {
    let fixture = setup();
    fixture.repo.init_repository(&fixture.scope()).await.unwrap();

    let clash = "An object named authorized-signatories.pdf already exists";
    fixture
        .store
        .inject_failure("get_children", RemoteError::Constraint(clash.to_string()));

    let err = fixture
        .repo
        .get_folders(&fixture.scope(), MOUNT, None, Page::All)
        .await
        .unwrap_err();
    assert!(!err.is_authentication_required());
    assert_eq!(err.kind(), ErrorKind::RepositoryFault);
    assert_eq!(fixture.repo.sessions().len(), 1);
    assert_eq!(fixture.store.call_count("open_session"), 1);
}

#[tokio::test]
async fn test_session_released_with_context() {
    let fixture = setup();
    let bob = fixture.repo.open_context("bob");
    fixture
        .repo
        .init_repository(&fixture.repo.begin_request(&bob))
        .await
        .unwrap();
    assert_eq!(fixture.repo.sessions().len(), 1);

    drop(bob);
    assert!(fixture.repo.sessions().is_empty());
}

#[tokio::test]
async fn test_init_failure_names_repository() {
    let fixture = setup();
    fixture
        .store
        .inject_failure("repository_info", RemoteError::Connection("refused".to_string()));

    let err = fixture.repo.init_repository(&fixture.scope()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepositoryFault);
    assert!(err.to_string().contains("repository 42"));
}

#[tokio::test]
async fn test_supported_configurations() {
    let fixture = setup();
    assert_eq!(fixture.repo.supported_configurations(), vec!["in-memory".to_string()]);
    assert_eq!(fixture.repo.supported_parameters().len(), 1);
}
