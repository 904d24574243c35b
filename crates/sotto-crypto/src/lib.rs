//! Cryptographic primitives for the Sotto session protocol.
//!
//! Implements the two building blocks of the 1:1 encrypted channel:
//!
//! - **Asynchronous key agreement** ([`x3dh`]): an initiator combines its
//!   identity and an ephemeral key with the responder's published prekey
//!   bundle to derive a shared secret while the responder is offline.
//! - **Per-message ratcheting** ([`ratchet`]): every encrypt and decrypt
//!   advances chain state derived from that secret, so compromise of a later
//!   state never exposes earlier traffic.
//!
//! This crate is synchronous and I/O-free. Callers supply randomness
//! explicitly ([`rand_core::CryptoRngCore`] bounds), which keeps the
//! protocols deterministic under seeded RNGs in tests.
//!
//! # Security
//!
//! Secret material zeroizes on drop and is redacted from `Debug` output.
//! Signed prekeys bind the signing identity to the agreement identity; a
//! bundle whose signature does not verify is rejected before any DH is
//! performed.

pub mod error;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod x3dh;

pub use error::{CryptoError, Result};
pub use kdf::SymmetricKey;
pub use keys::{IdentityKeyPair, PublicKey, SecretKey};
pub use ratchet::{DoubleRatchet, RatchetHeader, RatchetMessage};
pub use x3dh::{InitialMessage, InitiatorResult, PreKeyBundle, ResponderKeys, ResponderResult};

// Signature types appear in the public bundle API; re-export them so callers
// do not need a direct ed25519-dalek dependency.
pub use ed25519_dalek::{Signature, VerifyingKey};
