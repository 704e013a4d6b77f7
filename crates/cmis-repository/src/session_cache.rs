//! Per-context cache of authenticated remote sessions.
//!
//! A session is opened on first use within a [`UserContext`] and reused until
//! the context ends. Dropping the last clone of a context evicts its entry, so
//! handles never outlive the user they were opened for.

use std::sync::{Arc, Weak};

use cmis_repository_core::{ConnectionFactory, RemoteError, RemoteSession};
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

type SessionMap = DashMap<Uuid, Arc<dyn RemoteSession>>;

/// Identity of one logical client of the repository.
///
/// Cheap to clone. The cached session is released when the last clone drops.
#[derive(Clone)]
pub struct UserContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: Uuid,
    label: String,
    sessions: Weak<SessionMap>,
}

impl UserContext {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Caller-supplied label, passed to the connection factory.
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(sessions) = self.sessions.upgrade() {
            if sessions.remove(&self.id).is_some() {
                debug!("Released session of context {} ({})", self.id, self.label);
            }
        }
    }
}

/// Caches one session per user context.
pub struct SessionCache {
    factory: Arc<dyn ConnectionFactory>,
    sessions: Arc<SessionMap>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Start a new user context bound to this cache.
    pub fn open_context(&self, label: impl Into<String>) -> UserContext {
        UserContext {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                label: label.into(),
                sessions: Arc::downgrade(&self.sessions),
            }),
        }
    }

    /// Cached session of a context, opening a new one if absent or unusable.
    pub async fn get_session(
        &self,
        context: &UserContext,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        if !Weak::ptr_eq(&context.inner.sessions, &Arc::downgrade(&self.sessions)) {
            return Err(RemoteError::Connection(format!(
                "Context {} belongs to another repository",
                context.id()
            )));
        }

        let id = context.id();

        // Clone out of the map so no shard lock is held across the await below.
        let cached = self.sessions.get(&id).map(|entry| Arc::clone(entry.value()));
        if let Some(session) = cached {
            if session.is_usable() {
                return Ok(session);
            }
            debug!("Cached session of context {} is no longer usable", id);
            self.sessions.remove(&id);
        }

        let session = self.factory.open_session(context.label()).await?;
        info!("Opened remote session for context {} ({})", id, context.label());

        let entry = self.sessions.entry(id).or_insert(session);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop the cached session of a context. The next call opens a fresh one.
    pub fn invalidate(&self, context: &UserContext) {
        if self.sessions.remove(&context.id()).is_some() {
            info!("Invalidated session of context {}", context.id());
        }
    }

    /// Number of contexts currently holding a session.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
