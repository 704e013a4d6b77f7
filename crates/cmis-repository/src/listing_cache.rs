//! Request-scoped folder listing snapshots, plus the ordering and pagination
//! applied to them.
//!
//! A [`RequestScope`] is created at the start of one inbound call chain and
//! dropped at its end. Within it, each folder is enumerated remotely at most
//! once; later reads see the same snapshot. Nothing survives the scope.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use cmis_repository_core::LocalId;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::entity::{FileEntry, Folder, RepositoryEntity, SortKey};
use crate::error::Result;
use crate::session_cache::UserContext;

/// Pagination bound meaning "no bound".
pub const ALL_POS: i64 = -1;

/// Resolved children of one folder, in the remote store's native order.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderListing {
    pub folder_id: LocalId,
    pub folders: Vec<Folder>,
    pub file_entries: Vec<FileEntry>,
    pub entries: Vec<RepositoryEntity>,
}

impl FolderListing {
    /// Split classified children into the folder-only and document-only views.
    pub fn new(folder_id: LocalId, entries: Vec<RepositoryEntity>) -> Self {
        let mut folders = Vec::new();
        let mut file_entries = Vec::new();

        for entry in &entries {
            match entry {
                RepositoryEntity::Folder(f) => folders.push(f.clone()),
                RepositoryEntity::FileEntry(e) => file_entries.push(e.clone()),
            }
        }

        Self {
            folder_id,
            folders,
            file_entries,
            entries,
        }
    }
}

/// Folder listings loaded during one request.
#[derive(Default)]
pub struct ListingCache {
    listings: DashMap<LocalId, Arc<OnceCell<Arc<FolderListing>>>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing of a folder, running `load` only on the first request.
    ///
    /// Concurrent callers for the same folder wait on the same load. A failed
    /// load leaves nothing cached.
    pub async fn get_or_load<F, Fut>(
        &self,
        folder_id: LocalId,
        load: F,
    ) -> Result<Arc<FolderListing>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FolderListing>>,
    {
        let cell = self.listings.entry(folder_id).or_default().clone();

        let listing = cell
            .get_or_try_init(|| async {
                debug!("Loading listing of folder {}", folder_id);
                load().await.map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(listing))
    }

    /// Forget a folder's snapshot after this request changed it.
    pub fn evict(&self, folder_id: LocalId) {
        self.listings.remove(&folder_id);
    }

    pub fn contains(&self, folder_id: LocalId) -> bool {
        self.listings
            .get(&folder_id)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.listings.clear();
    }
}

/// One inbound call chain: the caller's context plus its listing snapshots.
pub struct RequestScope {
    context: UserContext,
    listings: ListingCache,
}

impl RequestScope {
    pub fn new(context: UserContext) -> Self {
        Self {
            context,
            listings: ListingCache::new(),
        }
    }

    pub fn context(&self) -> &UserContext {
        &self.context
    }

    pub fn listings(&self) -> &ListingCache {
        &self.listings
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if !self.listings.listings.is_empty() {
            debug!(
                "Discarding {} folder listings of context {}",
                self.listings.listings.len(),
                self.context.id()
            );
        }
    }
}

/// Attribute a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    Name,
    CreateDate,
    ModifiedDate,
    Size,
}

/// Requested listing order. Absent means the remote store's native order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: OrderField,
    pub ascending: bool,
}

impl OrderBy {
    pub fn new(field: OrderField, ascending: bool) -> Self {
        Self { field, ascending }
    }

    pub fn name(ascending: bool) -> Self {
        Self::new(OrderField::Name, ascending)
    }

    /// Stable sort; ties keep their native relative order.
    pub fn sort<T: SortKey>(&self, items: &mut [T]) {
        items.sort_by(|a, b| {
            let ordering = self.compare(a, b);
            if self.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }

    fn compare<T: SortKey>(&self, a: &T, b: &T) -> Ordering {
        match self.field {
            OrderField::Name => compare_names(a.sort_title(), b.sort_title()),
            OrderField::CreateDate => a.sort_created_at().cmp(&b.sort_created_at()),
            OrderField::ModifiedDate => a.sort_modified_at().cmp(&b.sort_modified_at()),
            OrderField::Size => a.sort_size().cmp(&b.sort_size()),
        }
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Slice of an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    #[default]
    All,
    /// Half-open range `[start, end)`
    Range { start: usize, end: usize },
}

impl Page {
    /// Build from host-style bounds where `ALL_POS` for both means everything.
    pub fn from_bounds(start: i64, end: i64) -> Self {
        if start == ALL_POS && end == ALL_POS {
            return Page::All;
        }

        let start = start.max(0) as usize;
        let end = if end == ALL_POS { usize::MAX } else { end.max(0) as usize };
        Page::Range { start, end }
    }

    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        match *self {
            Page::All => items.to_vec(),
            Page::Range { start, end } => {
                let end = end.min(items.len());
                if start >= end {
                    Vec::new()
                } else {
                    items[start..end].to_vec()
                }
            }
        }
    }
}

/// Order then paginate a cached view. The snapshot itself is not modified.
pub fn arrange<T: SortKey + Clone>(items: &[T], order: Option<&OrderBy>, page: Page) -> Vec<T> {
    match order {
        Some(order) => {
            let mut sorted = items.to_vec();
            order.sort(&mut sorted);
            page.apply(&sorted)
        }
        None => page.apply(items),
    }
}
