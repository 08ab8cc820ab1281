//! Session Registry
//!
//! Host-side bookkeeping for accepted peers. A session exists only after a
//! successful handshake and owns the outbound half of that peer's socket
//! through its writer task's channel.
//!
//! Broadcast takes a snapshot of the registry and delivers outside the
//! lock, so peers joining or leaving mid-broadcast neither block it nor
//! change its recipient set.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tokio::sync::mpsc;

use crate::game::state::PlayerId;
use crate::network::protocol::Message;

/// Handle to one live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Peer id declared in the handshake
    pub peer_id: PlayerId,
    /// Display name from the handshake
    pub display_name: String,
    /// Remote address
    pub addr: SocketAddr,
    /// Queue drained by the session's writer task
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Handshake completion time
    pub connected_at: Instant,
}

impl SessionHandle {
    /// Queue a message for this peer. Returns false if the session is gone.
    pub fn deliver(&self, msg: Message) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Capacity reached.
    #[error("room is full")]
    RoomFull,

    /// Another live session already uses this id.
    #[error("duplicate peer id")]
    DuplicatePeer,
}

/// Active sessions keyed by peer id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<PlayerId, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session unless the room is full or the id is taken.
    pub fn insert(&self, handle: SessionHandle, max_peers: usize) -> Result<(), SessionError> {
        let mut sessions = self.write();
        if sessions.contains_key(&handle.peer_id) {
            return Err(SessionError::DuplicatePeer);
        }
        if sessions.len() >= max_peers {
            return Err(SessionError::RoomFull);
        }
        sessions.insert(handle.peer_id, handle);
        Ok(())
    }

    /// Remove a session. Returns the handle if it was present.
    pub fn remove(&self, peer_id: &PlayerId) -> Option<SessionHandle> {
        self.write().remove(peer_id)
    }

    /// Look up a session.
    pub fn get(&self, peer_id: &PlayerId) -> Option<SessionHandle> {
        self.read().get(peer_id).cloned()
    }

    /// Point-in-time copy of all sessions.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.read().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of live sessions.
    pub fn peer_ids(&self) -> Vec<PlayerId> {
        self.read().keys().copied().collect()
    }

    /// Drop every session; their writer queues close with them.
    pub fn clear(&self) -> Vec<SessionHandle> {
        std::mem::take(&mut *self.write()).into_values().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PlayerId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PlayerId, SessionHandle>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
