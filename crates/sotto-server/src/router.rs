//! The router/fanout engine.
//!
//! One entry point per external operation: connect/disconnect, the
//! idempotent joins, `send_message`, bundle publication, and push
//! registration. Each send is classified by target, validated, persisted,
//! emitted, and (for group/direct targets) followed by push fallback for
//! offline recipients.
//!
//! # Per-send pipeline
//!
//! 1. Normalize and validate the request - a rejected request has no side
//!    effects at all.
//! 2. Resolve the fan-out set: the global room, the group's room (after
//!    re-validating the sender's membership server-side), or the two
//!    personal rooms of a direct pair. Encrypted payloads are never
//!    decrypted here; the router carries them opaquely.
//! 3. Persist to the append-only log. A persist failure aborts the send:
//!    nothing is emitted, nothing is pushed, only the sender learns.
//! 4. Broadcast to every live connection in the resolved rooms.
//! 5. Queue one push per offline human recipient, isolated per recipient.

use std::sync::Arc;

use sotto_proto::{
    ChatMessage, ConnId, ConversationTarget, GroupId, PushSubscription, SendRequest, UserId,
};

use crate::bundles::BundleRegistry;
use crate::connection::{ConnContext, DeliverySender};
use crate::directory::{GroupDirectory, UserDirectory};
use crate::env::Clock;
use crate::error::{RoomError, SendError};
use crate::presence::PresenceTracker;
use crate::push::{PushConfig, PushFallback, PushGateway, SubscriptionStore, redact};
use crate::rooms::{RoomId, RoomRegistry};
use crate::storage::MessageStore;

/// The wired-together routing engine.
///
/// Connections are handled independently and concurrently; there is no
/// global lock across the system, only the registry's own short-lived one.
pub struct ChatServer {
    registry: RoomRegistry,
    presence: PresenceTracker,
    bundles: Arc<BundleRegistry>,
    push: PushFallback,
    push_config: PushConfig,
    store: Arc<dyn MessageStore>,
    groups: Arc<dyn GroupDirectory>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl ChatServer {
    /// Wire the engine to its collaborators.
    pub fn new(
        store: Arc<dyn MessageStore>,
        groups: Arc<dyn GroupDirectory>,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn PushGateway>,
        clock: Arc<dyn Clock>,
        push_config: PushConfig,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(),
            presence: PresenceTracker::new(),
            bundles: Arc::new(BundleRegistry::new()),
            push: PushFallback::new(gateway, Arc::new(SubscriptionStore::new())),
            push_config,
            store,
            groups,
            users,
            clock,
        }
    }

    /// Register an authenticated connection and its delivery channel.
    ///
    /// The connection's personal room is joined here - once, at connection
    /// time - so direct messages reach it without further setup. All other
    /// rooms require explicit joins after every (re)connect.
    pub fn connect(&self, ctx: &ConnContext, sender: DeliverySender) {
        self.registry.register(ctx, sender);
        // Registration just inserted the connection; the join cannot fail.
        let _ = self.registry.join(ctx.conn, RoomId::User(ctx.user));
        self.presence.connected(ctx.user);
        tracing::info!(conn = %ctx.conn, user = %ctx.user, "connection registered");
    }

    /// Drop a connection: future delivery to it simply stops.
    pub fn disconnect(&self, conn: ConnId) {
        if let Some(user) = self.registry.unregister(conn) {
            self.presence.disconnected(user);
            tracing::info!(%conn, %user, "connection dropped");
        }
    }

    /// Join the global room. Idempotent.
    pub fn join_public(&self, conn: ConnId) -> Result<(), RoomError> {
        self.registry.join(conn, RoomId::Public)
    }

    /// Join a group's room. Idempotent; membership is validated
    /// server-side, not taken from the client.
    pub fn join_group(&self, conn: ConnId, group: GroupId) -> Result<(), RoomError> {
        let user = self.registry.user_of(conn).ok_or(RoomError::UnknownConnection(conn))?;
        if self.groups.members(group).is_none() {
            return Err(RoomError::UnknownGroup(group));
        }
        if !self.groups.is_member(group, user) {
            return Err(RoomError::NotAMember(group));
        }
        self.registry.join(conn, RoomId::Group(group))
    }

    /// (Re-)join the connection's own personal room. Idempotent; normally
    /// already done by [`ChatServer::connect`].
    pub fn join_direct(&self, conn: ConnId) -> Result<(), RoomError> {
        let user = self.registry.user_of(conn).ok_or(RoomError::UnknownConnection(conn))?;
        self.registry.join(conn, RoomId::User(user))
    }

    /// Route one message: validate, resolve, persist, emit, push.
    ///
    /// Returns the persisted record (the sender's acknowledgement). Every
    /// error leaves the system exactly as it was, except
    /// [`SendError::Persistence`], which is returned only to the sender
    /// after the log rejected the append - nothing was emitted or pushed.
    pub fn send_message(
        &self,
        ctx: &ConnContext,
        request: SendRequest,
    ) -> Result<ChatMessage, SendError> {
        let (target, body) = request.normalize()?;
        let plan = self.resolve(ctx.user, target)?;

        let message = ChatMessage {
            sender: ctx.user,
            target,
            body,
            server_timestamp_ms: self.clock.now_ms(),
        };

        if let Err(error) = self.store.append(&message) {
            tracing::error!(%error, sender = %ctx.user, %target, "persist failed; send aborted");
            return Err(SendError::Persistence);
        }

        let delivered = self.registry.broadcast(&plan.rooms, &message);
        tracing::debug!(sender = %ctx.user, %target, delivered, "message routed");

        let offline: Vec<UserId> = plan
            .push_recipients
            .into_iter()
            .filter(|recipient| !self.presence.is_online(*recipient))
            .collect();
        if !offline.is_empty() {
            let preview = redact(&message.body, &self.push_config);
            self.push.notify(&offline, &preview);
        }

        Ok(message)
    }

    /// Publish a user's prekey bundle, replacing any previous one.
    pub fn publish_bundle(&self, user: UserId, blob: Vec<u8>) {
        self.bundles.publish(user, blob);
    }

    /// Fetch a peer's current bundle.
    pub fn fetch_bundle(&self, peer: UserId) -> Option<Vec<u8>> {
        self.bundles.fetch(peer)
    }

    /// The bundle registry, shareable as a [`sotto_core::BundleFetcher`]
    /// for session managers wired in-process.
    pub fn bundles(&self) -> Arc<BundleRegistry> {
        Arc::clone(&self.bundles)
    }

    /// Register (or refresh) a user's push subscription.
    pub fn register_push_subscription(&self, user: UserId, subscription: PushSubscription) {
        self.push.subscriptions().register(user, subscription);
    }

    /// The live registry, exposed for transports and tests.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Resolve the fan-out plan for a validated target.
    fn resolve(&self, sender: UserId, target: ConversationTarget) -> Result<FanoutPlan, SendError> {
        match target {
            ConversationTarget::Public => {
                // Public traffic gets no push fallback; it has no bounded
                // human recipient set.
                Ok(FanoutPlan { rooms: vec![RoomId::Public], push_recipients: Vec::new() })
            },
            ConversationTarget::Group(group) => {
                let members =
                    self.groups.members(group).ok_or(SendError::UnknownGroup(group))?;
                if !members.contains(&sender) {
                    return Err(SendError::NotAMember(group));
                }
                let push_recipients =
                    members.into_iter().filter(|member| *member != sender).collect();
                Ok(FanoutPlan { rooms: vec![RoomId::Group(group)], push_recipients })
            },
            ConversationTarget::Direct(peer) => {
                if !self.users.exists(peer) {
                    return Err(SendError::UnknownUser(peer));
                }
                // The sender's own room too, so the sender's other
                // connections see the sent message.
                let rooms = vec![RoomId::User(sender), RoomId::User(peer)];
                let push_recipients = if peer == sender { Vec::new() } else { vec![peer] };
                Ok(FanoutPlan { rooms, push_recipients })
            },
        }
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer").finish()
    }
}

struct FanoutPlan {
    rooms: Vec<RoomId>,
    push_recipients: Vec<UserId>,
}
