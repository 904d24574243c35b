//! Conversation targets.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};

/// Where a message is addressed.
///
/// The target determines exactly one fan-out set and whether the payload may
/// be end-to-end encrypted: only [`ConversationTarget::Direct`] channels are
/// encryption-eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationTarget {
    /// The single global room every connection may join.
    Public,
    /// A group room; delivery is scoped to connections joined to it.
    Group(GroupId),
    /// A 1:1 conversation with another user.
    Direct(UserId),
}

impl ConversationTarget {
    /// Whether payloads addressed here may carry an encrypted envelope.
    pub fn is_encryption_eligible(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

impl std::fmt::Display for ConversationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Group(g) => write!(f, "{g}"),
            Self::Direct(u) => write!(f, "direct:{}", u.0),
        }
    }
}

/// Target discriminant as clients send it, before the id is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Addressed to the global room.
    Public,
    /// Addressed to a group; `target_id` names the group.
    Group,
    /// Addressed to a single peer; `target_id` names the peer.
    Direct,
}
