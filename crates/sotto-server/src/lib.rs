//! Message router, fanout engine, and push fallback.
//!
//! The server side of Sotto is routing-only: it never encrypts, decrypts,
//! or inspects encrypted payloads. Clients own all session state; the
//! server classifies each message by target, persists it, emits it to the
//! live connections joined to the resolved room(s), and falls back to push
//! for offline recipients.
//!
//! # Architecture
//!
//! [`ChatServer`] wires the pieces together:
//!
//! - [`rooms::RoomRegistry`] - live connections and their room memberships
//! - [`presence::PresenceTracker`] - who is online right now
//! - [`bundles::BundleRegistry`] - published prekey bundles, stored opaque
//! - [`push`] - subscriptions and the fire-and-forget dispatch path
//! - [`storage`] - the append-only message log (memory and redb backends)
//! - [`directory`] - group/user membership, an external collaborator seam
//!
//! # Ordering and failure
//!
//! Validation precedes persistence; persistence precedes emission. A send
//! that fails validation has no side effects; a send whose persist fails is
//! aborted with nothing emitted and the failure reported only to the
//! sender. Live emission and push are best-effort - the persisted log is
//! the one source of truth a reconnecting client can reconcile against.

pub mod bundles;
pub mod connection;
pub mod directory;
pub mod env;
pub mod error;
pub mod presence;
pub mod push;
pub mod rooms;
pub mod router;
pub mod storage;

pub use bundles::BundleRegistry;
pub use connection::{ConnContext, DeliveryReceiver, DeliverySender};
pub use directory::{GroupDirectory, MemoryDirectory, UserDirectory};
pub use env::{Clock, FixedClock, SystemClock};
pub use error::{RoomError, SendError};
pub use presence::PresenceTracker;
pub use push::{PushConfig, PushFallback, PushGateway, PushOutcome, SubscriptionStore};
pub use rooms::{RoomId, RoomRegistry};
pub use router::ChatServer;
pub use storage::{MemoryMessageStore, MessageStore, RedbMessageStore, StorageError};
