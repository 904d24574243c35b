//! Per-connection context and delivery channels.

use sotto_proto::{ChatMessage, ConnId, UserId};
use tokio::sync::mpsc;

/// Immutable identity of one authenticated connection.
///
/// Produced exactly once by the external credential collaborator when the
/// connection authenticates, then passed explicitly into every handler.
/// Never stored as ambient mutable state: a connection's user cannot change
/// for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnContext {
    /// The live connection.
    pub conn: ConnId,
    /// The authenticated user behind it.
    pub user: UserId,
}

impl ConnContext {
    /// Build a context for an authenticated connection.
    pub fn new(conn: ConnId, user: UserId) -> Self {
        Self { conn, user }
    }
}

/// Sending half of a connection's delivery channel.
///
/// The transport layer drains the receiving half and writes each message to
/// the wire. Unbounded: a connection too slow to drain is the transport's
/// problem to detect and close, not the router's.
pub type DeliverySender = mpsc::UnboundedSender<ChatMessage>;

/// Receiving half of a connection's delivery channel.
pub type DeliveryReceiver = mpsc::UnboundedReceiver<ChatMessage>;

/// Create a delivery channel pair for a new connection.
pub fn delivery_channel() -> (DeliverySender, DeliveryReceiver) {
    mpsc::unbounded_channel()
}
