//! Rooms and the registry that owns them.
//!
//! A [`Room`] groups at most one host connection with any number of viewer
//! connections, and carries the per-room bookkeeping the relay needs while
//! fanning out frames: the sequence counter, the sliding send window, and a
//! handle to the last payload sent.
//!
//! # Locking
//!
//! [`RoomRegistry`] keeps one `RwLock` over the code → room map and one
//! `Mutex` per room.  The map lock is only write-locked when a room is
//! created or evicted, so frame traffic in unrelated rooms never contends.
//! When both locks are held the order is always map first, then room.
//!
//! # Persistence
//!
//! By default rooms live forever, so a host that reconnects after a network
//! blip finds its viewers still waiting.  With persistence disabled, a room
//! with no host and no viewers is evicted as soon as the last member leaves.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use bytes::Bytes;
use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::domain::rate::RateWindow;

/// Alphabet for server-assigned room codes (no 0/O or 1/I look-alikes).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of server-assigned room codes.
pub const GENERATED_CODE_LEN: usize = 6;

/// Unique identifier of one underlying transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Room ──────────────────────────────────────────────────────────────────────

/// Membership and relay bookkeeping for one room code.
#[derive(Debug)]
pub struct Room {
    code: String,
    host: Option<ConnectionId>,
    viewers: HashSet<ConnectionId>,
    rate: RateWindow,
    sequence: u64,
    /// Handle to the last payload sent.  Holding the `Bytes` keeps its
    /// allocation alive, so a different buffer can never reuse the address
    /// and be mistaken for it.
    last_sent_payload: Option<Bytes>,
    last_immediate_flush_at: Option<Instant>,
    evicted: bool,
}

impl Room {
    pub fn new(code: impl Into<String>, max_sends_per_sec: u32) -> Self {
        Self {
            code: code.into(),
            host: None,
            viewers: HashSet::new(),
            rate: RateWindow::new(max_sends_per_sec),
            sequence: 0,
            last_sent_payload: None,
            last_immediate_flush_at: None,
            evicted: false,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    pub fn viewers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.viewers.iter().copied()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_viewer(&self, id: ConnectionId) -> bool {
        self.viewers.contains(&id)
    }

    /// The most recently stamped sequence number (0 before the first frame).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Advances the sequence counter and returns the new value.
    ///
    /// The first frame of a room is numbered 1.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Returns `true` if `payload` is the very same buffer handle (same
    /// pointer and length) as the last payload sent.
    ///
    /// Content is never compared.  Two empty payloads always compare equal.
    pub fn is_same_payload(&self, payload: &Bytes) -> bool {
        self.last_sent_payload
            .as_ref()
            .is_some_and(|last| last.as_ptr() == payload.as_ptr() && last.len() == payload.len())
    }

    pub fn remember_payload(&mut self, payload: Bytes) {
        self.last_sent_payload = Some(payload);
    }

    pub fn has_remembered_payload(&self) -> bool {
        self.last_sent_payload.is_some()
    }

    pub fn rate_mut(&mut self) -> &mut RateWindow {
        &mut self.rate
    }

    /// Records that a frame went out on the broadcast path at `now`.
    pub fn mark_immediate_flush(&mut self, now: Instant) {
        self.last_immediate_flush_at = Some(now);
    }

    pub fn last_immediate_flush_at(&self) -> Option<Instant> {
        self.last_immediate_flush_at
    }

    /// `true` once the registry has dropped this room.  Mutating an evicted
    /// room has no effect on the relay.
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }
}

/// Eviction policy for a room whose membership just shrank.
///
/// Rooms are only ever evicted when persistence is disabled *and* the room
/// has neither a host nor viewers.
pub fn should_evict(persist_rooms: bool, has_host: bool, viewers_empty: bool) -> bool {
    !persist_rooms && !has_host && viewers_empty
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A room shared between the registry and concurrent callers.
pub type SharedRoom = Arc<Mutex<Room>>;

/// Locks a room, recovering the guard if a previous holder panicked.
///
/// Room state is plain bookkeeping; a panic mid-update cannot leave it in a
/// state that is unsafe to keep relaying with.
pub fn lock_room(room: &SharedRoom) -> MutexGuard<'_, Room> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The map of every room code to its [`Room`].
///
/// Owned explicitly (typically behind an `Arc`) and handed to whoever needs
/// it; there is no process-wide instance.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, SharedRoom>>,
    persist_rooms: bool,
    max_sends_per_sec: u32,
}

impl RoomRegistry {
    /// Creates an empty registry.
    ///
    /// `max_sends_per_sec` seeds the rate window of every room created.
    pub fn new(persist_rooms: bool, max_sends_per_sec: u32) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            persist_rooms,
            max_sends_per_sec,
        }
    }

    pub fn persist_rooms(&self) -> bool {
        self.persist_rooms
    }

    /// Returns the room for `code`, creating it if necessary.  Never fails.
    pub fn get_or_create(&self, code: &str) -> SharedRoom {
        if let Some(room) = self.read_map().get(code) {
            return Arc::clone(room);
        }
        let mut rooms = self.write_map();
        let room = rooms.entry(code.to_string()).or_insert_with(|| {
            debug!("room {code} created");
            Arc::new(Mutex::new(Room::new(code, self.max_sends_per_sec)))
        });
        Arc::clone(room)
    }

    /// Returns the room for `code` without creating it.
    pub fn get(&self, code: &str) -> Option<SharedRoom> {
        self.read_map().get(code).map(Arc::clone)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.read_map().contains_key(code)
    }

    pub fn room_count(&self) -> usize {
        self.read_map().len()
    }

    /// Makes `id` the host of `code`, creating the room if needed.
    ///
    /// Last writer wins: returns the previous host if a *different*
    /// connection held the role.
    pub fn attach_host(&self, code: &str, id: ConnectionId) -> Option<ConnectionId> {
        self.with_live_room(code, |room| {
            let previous = room.host.replace(id);
            previous.filter(|prev| *prev != id)
        })
    }

    /// Adds `id` to the viewers of `code`, creating the room if needed.
    ///
    /// Returns `false` if `id` was already a viewer.
    pub fn add_viewer(&self, code: &str, id: ConnectionId) -> bool {
        self.with_live_room(code, |room| room.viewers.insert(id))
    }

    /// Removes `id` from the viewers of `code`.
    ///
    /// Returns `false` if it was not a viewer (or the room does not exist).
    pub fn remove_viewer(&self, code: &str, id: ConnectionId) -> bool {
        self.shrink_room(code, |room| room.viewers.remove(&id))
            .unwrap_or(false)
    }

    /// Clears the host of `code` only if it is still `id`.
    ///
    /// A stale disconnect from an old host therefore cannot clobber a newer
    /// host that already took over.  The departing host's last payload is
    /// released with it.
    pub fn detach_host_if_matches(&self, code: &str, id: ConnectionId) -> bool {
        self.shrink_room(code, |room| {
            if room.host == Some(id) {
                room.host = None;
                room.last_sent_payload = None;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Allocates a room code no live room is using.
    ///
    /// With persistence on, the room is created right away and keeps the
    /// code for good.  With persistence off, nothing is stored: the room is
    /// created by the first join, and a code nobody joins costs nothing.
    pub fn allocate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut rooms = self.write_map();
        loop {
            let code: String = (0..GENERATED_CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if rooms.contains_key(&code) {
                continue;
            }
            if self.persist_rooms {
                rooms.insert(
                    code.clone(),
                    Arc::new(Mutex::new(Room::new(code.as_str(), self.max_sends_per_sec))),
                );
            }
            debug!("room {code} allocated");
            return code;
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Runs `f` on the live room for `code`.
    ///
    /// If the room found was evicted between lookup and locking, the lookup
    /// is repeated so the caller never joins an orphaned room.
    fn with_live_room<R>(&self, code: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        loop {
            let room = self.get_or_create(code);
            let mut guard = lock_room(&room);
            if guard.evicted {
                continue;
            }
            return f(&mut guard);
        }
    }

    /// Runs a membership-shrinking `f` on an existing room, then applies the
    /// eviction policy.
    fn shrink_room<R>(&self, code: &str, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        let room = self.get(code)?;
        let (result, evict) = {
            let mut guard = lock_room(&room);
            if guard.evicted {
                return None;
            }
            let result = f(&mut guard);
            let evict = should_evict(
                self.persist_rooms,
                guard.host.is_some(),
                guard.viewers.is_empty(),
            );
            (result, evict)
        };
        if evict {
            self.evict_if_still_empty(code, &room);
        }
        Some(result)
    }

    fn evict_if_still_empty(&self, code: &str, room: &SharedRoom) {
        let mut rooms = self.write_map();
        let is_same_room = rooms.get(code).is_some_and(|current| Arc::ptr_eq(current, room));
        if !is_same_room {
            return;
        }
        let mut guard = lock_room(room);
        // Re-check: someone may have joined between unlocking and here.
        if should_evict(
            self.persist_rooms,
            guard.host.is_some(),
            guard.viewers.is_empty(),
        ) {
            guard.evicted = true;
            rooms.remove(code);
            debug!("room {code} evicted (no host, no viewers)");
        }
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, SharedRoom>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, SharedRoom>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
