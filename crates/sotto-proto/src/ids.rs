//! Identifier newtypes.
//!
//! Users, groups, and live connections are addressed by opaque 64-bit ids
//! issued by the external account/credential collaborators. Newtypes keep
//! them from being confused for one another at call sites.

use serde::{Deserialize, Serialize};

/// The single logical device slot.
///
/// Sessions are addressed by `(owner, peer, device)`; this build fixes the
/// device component to one slot per user, so the constant is part of the
/// session key but never varies.
pub const DEVICE_ID: u32 = 1;

/// A registered user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// A chat group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// A live connection to the server.
///
/// Connection ids are ephemeral: a user that reconnects gets a fresh id and
/// must re-join rooms explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}
