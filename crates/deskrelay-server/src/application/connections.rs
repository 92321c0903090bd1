//! The table of live connections and their session states.
//!
//! Rooms only store [`ConnectionId`]s.  This table maps each id to the
//! connection's transport and to its [`SessionState`], so the delivery
//! engine can turn a room's member list into transports to send on.
//!
//! Lock order: a room lock may be held while the table is read-locked, never
//! the other way round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use deskrelay_core::ConnectionId;

use crate::application::transport::Transport;

/// Where a connection is in its lifecycle.
///
/// ```text
/// Unassigned ──join-as-host──► Host ──┐
///      │                              ├──leave/close──► Detached
///      └─────join-as-viewer──► Viewer ┘
/// ```
///
/// `Detached` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unassigned,
    Host { room_code: String },
    Viewer { room_code: String },
    Detached,
}

impl SessionState {
    /// The room this connection is a member of, if any.
    pub fn room_code(&self) -> Option<&str> {
        match self {
            SessionState::Host { room_code } | SessionState::Viewer { room_code } => {
                Some(room_code)
            }
            SessionState::Unassigned | SessionState::Detached => None,
        }
    }
}

/// One live connection.
pub struct ConnectionEntry {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    rooms_created: AtomicU32,
}

impl ConnectionEntry {
    fn new(id: ConnectionId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            state: Mutex::new(SessionState::Unassigned),
            rooms_created: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.lock_state().clone()
    }

    /// Claims one more `create-room` for this connection unless it already
    /// made `limit` of them.
    pub(crate) fn try_claim_room_creation(&self, limit: u32) -> bool {
        self.rooms_created
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Only the session manager moves a connection between states.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: RwLock<HashMap<ConnectionId, Arc<ConnectionEntry>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, transport: Arc<dyn Transport>) -> Arc<ConnectionEntry> {
        let id = ConnectionId::new();
        let entry = Arc::new(ConnectionEntry::new(id, transport));
        self.write().insert(id, Arc::clone(&entry));
        entry
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.write().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.read().get(&id).map(Arc::clone)
    }

    pub fn transport(&self, id: ConnectionId) -> Option<Arc<dyn Transport>> {
        self.read().get(&id).map(|entry| Arc::clone(&entry.transport))
    }

    /// Resolves many ids under a single read lock.  Unknown ids (already
    /// disconnected) are skipped.
    pub fn transports_for<I>(&self, ids: I) -> Vec<(ConnectionId, Arc<dyn Transport>)>
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let entries = self.read();
        ids.into_iter()
            .filter_map(|id| entries.get(&id).map(|e| (id, Arc::clone(&e.transport))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<ConnectionEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<ConnectionEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
