//! Boundary validation errors.

use thiserror::Error;

/// A send request rejected before any state change.
///
/// Every variant means the operation was refused outright: nothing was
/// persisted, emitted, or pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No body field populated, or the populated one is empty.
    #[error("message has no payload")]
    EmptyPayload,

    /// More than one body field populated.
    #[error("message populates more than one payload field")]
    AmbiguousPayload,

    /// Group or direct target without an id.
    #[error("target kind requires a target id")]
    MissingTargetId,

    /// Public target with an id.
    #[error("public target does not take a target id")]
    UnexpectedTargetId,

    /// Encrypted envelope addressed to a target that is not
    /// encryption-eligible.
    #[error("target is not encryption-eligible")]
    EncryptionIneligible,
}
