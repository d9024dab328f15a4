//! Session storage seam.
//!
//! portico never reads or writes sessions itself. It only carries a store
//! from the [`Application`](crate::Application) to each router that has none
//! of its own, and from the router to each [`Request`](crate::Request) it
//! handles. Bring your own backend by implementing [`SessionStore`].

use bytes::Bytes;
use dashmap::DashMap;

/// A key-value session backend shared by every request of a router.
///
/// Implementations are called concurrently from many connection tasks.
pub trait SessionStore: Send + Sync + 'static {
    /// Returns the serialized session stored under `id`.
    fn load(&self, id: &str) -> Option<Bytes>;
    /// Stores `data` under `id`, replacing any previous session.
    fn save(&self, id: &str, data: Bytes);
    fn remove(&self, id: &str);
}

/// Process-local session store. Sessions do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, id: &str) -> Option<Bytes> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn save(&self, id: &str, data: Bytes) {
        self.sessions.insert(id.to_owned(), data);
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}
