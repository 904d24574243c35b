//! Router error taxonomy.
//!
//! Send failures are reported only to the sender; nothing is emitted or
//! pushed for a failed send. Internal detail (which backend, what broke)
//! stays in server logs.

use sotto_proto::{ConnId, GroupId, UserId, ValidationError};
use thiserror::Error;

/// A send rejected or aborted; no delivery occurred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The request failed boundary validation; no state changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The target group does not exist.
    #[error("{0} does not exist")]
    UnknownGroup(GroupId),

    /// The sender is not a member of the target group. Membership is
    /// re-validated server-side on every send; client-asserted membership
    /// is never trusted.
    #[error("sender is not a member of {0}")]
    NotAMember(GroupId),

    /// The direct peer does not resolve to a known user.
    #[error("{0} does not exist")]
    UnknownUser(UserId),

    /// The message log rejected the append. The send was aborted before
    /// any emission.
    #[error("message could not be persisted")]
    Persistence,
}

/// A room or connection operation that could not be performed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The connection is not registered (never connected or already
    /// disconnected).
    #[error("{0} is not registered")]
    UnknownConnection(ConnId),

    /// The group being joined does not exist.
    #[error("{0} does not exist")]
    UnknownGroup(GroupId),

    /// The joining user is not a member of the group.
    #[error("user is not a member of {0}")]
    NotAMember(GroupId),
}
