//! Crypto-layer error types.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Failures surfaced by key agreement and ratcheting.
///
/// Authentication failures carry no distinguishing detail: a peer learns
/// that decryption failed, never why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Signed-prekey signature did not verify against the bundle's identity.
    #[error("prekey signature verification failed")]
    InvalidSignature,

    /// Key bytes do not decode to a valid public key.
    #[error("malformed public key")]
    InvalidPublicKey,

    /// AEAD authentication failed; ciphertext, key, or associated data do
    /// not match.
    #[error("decryption failed")]
    DecryptFailed,

    /// Encrypt called before a sending chain exists.
    #[error("sending chain not initialized")]
    NoSendChain,

    /// Decrypt called before a receiving chain exists.
    #[error("receiving chain not initialized")]
    NoRecvChain,

    /// Message numbering would require retaining more skipped keys than the
    /// configured bound.
    #[error("too many skipped message keys")]
    TooManySkippedKeys,
}
