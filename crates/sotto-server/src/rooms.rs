//! Live-connection registry and room membership.
//!
//! A room is a server-side addressable set of live connections: the single
//! public room, one room per group, and one personal room per user. Rooms
//! hold connections, not users - membership is explicit per connection and
//! gone when the connection goes, so a reconnecting client re-joins before
//! it sees room traffic again.
//!
//! # Join/send ordering
//!
//! All membership changes and broadcasts take the same registry lock, and a
//! join is acknowledged (its call returns) only after the membership is
//! recorded. A join that completes therefore happens strictly before any
//! later broadcast, closing the race where a message could miss a
//! connection that joined "concurrently".

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sotto_proto::{ChatMessage, ConnId, GroupId, UserId};

use crate::connection::{ConnContext, DeliverySender};
use crate::error::RoomError;

/// Address of one broadcast set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// The single global room.
    Public,
    /// A group's room.
    Group(GroupId),
    /// A user's personal room; direct messages land here.
    User(UserId),
}

#[derive(Debug)]
struct ConnEntry {
    user: UserId,
    sender: DeliverySender,
    joined: HashSet<RoomId>,
}

#[derive(Debug, Default)]
struct Registry {
    conns: HashMap<ConnId, ConnEntry>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
}

/// Tracks live connections and the rooms each has joined.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: Mutex<Registry>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and its delivery channel.
    ///
    /// The connection starts with no room memberships; joining is a
    /// separate, explicit step.
    pub fn register(&self, ctx: &ConnContext, sender: DeliverySender) {
        let mut registry = self.lock();
        registry.conns.insert(
            ctx.conn,
            ConnEntry { user: ctx.user, sender, joined: HashSet::new() },
        );
    }

    /// Remove a connection and all its memberships.
    ///
    /// Returns the user the connection belonged to, if it was registered.
    /// Future deliveries simply stop; nothing in flight is recalled.
    pub fn unregister(&self, conn: ConnId) -> Option<UserId> {
        let mut registry = self.lock();
        let entry = registry.conns.remove(&conn)?;
        for room in &entry.joined {
            if let Some(members) = registry.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    registry.rooms.remove(room);
                }
            }
        }
        Some(entry.user)
    }

    /// Join `conn` to `room`. Idempotent: joining an already-joined room
    /// changes nothing and never duplicates delivery.
    ///
    /// Membership is recorded before this returns; the join is acknowledged
    /// by completion.
    pub fn join(&self, conn: ConnId, room: RoomId) -> Result<(), RoomError> {
        let mut registry = self.lock();
        let entry = registry.conns.get_mut(&conn).ok_or(RoomError::UnknownConnection(conn))?;
        entry.joined.insert(room);
        registry.rooms.entry(room).or_default().insert(conn);
        Ok(())
    }

    /// The authenticated user behind `conn`.
    pub fn user_of(&self, conn: ConnId) -> Option<UserId> {
        self.lock().conns.get(&conn).map(|entry| entry.user)
    }

    /// Whether `conn` is currently joined to `room`.
    pub fn is_joined(&self, conn: ConnId, room: RoomId) -> bool {
        self.lock().rooms.get(&room).is_some_and(|members| members.contains(&conn))
    }

    /// Number of connections joined to `room`.
    pub fn room_size(&self, room: RoomId) -> usize {
        self.lock().rooms.get(&room).map_or(0, HashSet::len)
    }

    /// Emit `message` to every connection joined to any of `rooms`.
    ///
    /// A connection joined to several of the rooms still receives the
    /// message exactly once. Connections whose channel is closed are
    /// skipped; disconnect cleanup removes them.
    ///
    /// Returns the number of connections the message was handed to.
    pub fn broadcast(&self, rooms: &[RoomId], message: &ChatMessage) -> usize {
        let registry = self.lock();

        let mut targets: HashSet<ConnId> = HashSet::new();
        for room in rooms {
            if let Some(members) = registry.rooms.get(room) {
                targets.extend(members.iter().copied());
            }
        }

        let mut delivered = 0;
        for conn in targets {
            if let Some(entry) = registry.conns.get(&conn) {
                if entry.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    tracing::debug!(%conn, "delivery channel closed; skipping");
                }
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // Registry mutations cannot leave the map inconsistent mid-way;
            // continue with the inner state.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
