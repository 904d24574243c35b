//! Session layer for 1:1 encrypted channels.
//!
//! Owns everything between "I want to send user X an encrypted message" and
//! the opaque envelope the router carries: long-term identity and prekey
//! material ([`vault`]), identity trust decisions ([`trust`]), asynchronous
//! session establishment and the per-session cipher state machine
//! ([`session`]), and the orchestrating [`manager`] that serializes all
//! mutation per peer.
//!
//! # Architecture
//!
//! Protocol state is pure data (`sotto-crypto` types plus the
//! [`session::SessionRecord`] wrapper); all I/O happens through the traits
//! in [`store`]. Production wires durable backends behind those traits,
//! tests wire in-memory ones, and the logic cannot tell the difference.
//!
//! Randomness is always supplied by the caller, so every flow can run under
//! a seeded RNG in tests.
//!
//! # Components
//!
//! - [`vault`]: identity keys, signed prekey, one-time prekey batches
//! - [`trust`]: swappable identity trust policy (trust-on-first-use default)
//! - [`session`]: cipher session state machine and its persisted record
//! - [`manager`]: lazy negotiation, encrypt/decrypt entry points, per-peer
//!   ordering
//! - [`store`]: session/bundle storage abstractions

pub mod error;
pub mod manager;
pub mod session;
pub mod store;
pub mod trust;
pub mod vault;

pub use error::{NegotiationReason, SessionError, StoreError};
pub use manager::SessionManager;
pub use session::{SessionPhase, SessionRecord};
pub use store::{BundleFetcher, MemorySessionStore, SessionStore};
pub use trust::{AcceptAll, TrustDecision, TrustOnFirstUse, TrustPolicy};
pub use vault::PreKeyVault;
