//! Wire-level vocabulary for the Sotto messaging core.
//!
//! This crate defines the types every other layer speaks: identifiers,
//! conversation targets, tagged message payloads, and push subscription
//! records. It carries no protocol logic - routing lives in `sotto-server`
//! and encryption in `sotto-core`/`sotto-crypto`.
//!
//! # Design
//!
//! Payloads are explicit tagged variants, never optional-field shapes. A
//! message body is plain text, an image reference, or an encrypted envelope -
//! exactly one, enforced by the type system. The external send interface
//! still accepts the loose optional-field shape clients produce
//! ([`SendRequest`]); it is normalized into [`MessageBody`] at the boundary
//! and rejected there if ambiguous or empty.
//!
//! Everything here serializes with serde; CBOR (via `ciborium`) is the
//! encoding used for stored messages and session blobs.

pub mod error;
pub mod ids;
pub mod message;
pub mod payload;
pub mod push;
pub mod target;

pub use error::ValidationError;
pub use ids::{ConnId, DEVICE_ID, GroupId, UserId};
pub use message::ChatMessage;
pub use payload::{EncryptedEnvelope, EnvelopeKind, MessageBody, SendRequest};
pub use push::{PREVIEW_PLACEHOLDER, PushKeys, PushPreview, PushSubscription};
pub use target::{ConversationTarget, TargetKind};
