//! Message payloads and the send-request boundary.
//!
//! Internally a payload is a tagged [`MessageBody`]: plain text, an image
//! reference, or an encrypted envelope. Clients submit the looser
//! [`SendRequest`] shape (optional fields); [`SendRequest::normalize`] is the
//! single place that turns it into a validated `(target, body)` pair, and
//! everything past that point works with the enum.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{GroupId, UserId};
use crate::target::{ConversationTarget, TargetKind};

/// Discriminates the two ciphertext framings an encrypted envelope can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// First message of a session: the ciphertext travels alongside the key
    /// agreement material the recipient needs to bootstrap a session.
    PreKey,
    /// Any later message of an established session.
    Normal,
}

/// An end-to-end encrypted payload.
///
/// The router treats `body` as opaque bytes; only the two session endpoints
/// can interpret it. `registration_id` identifies the sender's key
/// registration so the recipient can detect reinstalls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Ciphertext framing.
    pub kind: EnvelopeKind,
    /// Opaque session-layer bytes.
    pub body: Vec<u8>,
    /// Sender's key registration id.
    pub registration_id: u32,
}

/// A validated message payload.
///
/// Exactly one variant per message; the either/or shape of the wire request
/// is resolved before a `MessageBody` exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text.
    Text(String),
    /// An image reference (data URL or storage key; encoding limits are the
    /// image collaborator's concern).
    Image(String),
    /// An end-to-end encrypted envelope. Only valid on direct targets.
    Encrypted(EncryptedEnvelope),
}

impl MessageBody {
    /// Whether this body is an encrypted envelope.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// The send interface as clients submit it.
///
/// At most one of `text`, `image`, `envelope` may be populated; the target id
/// is required for group and direct kinds. [`SendRequest::normalize`] enforces
/// both and produces the internal representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Target discriminant.
    pub target_kind: TargetKind,
    /// Group or peer id, depending on `target_kind`.
    pub target_id: Option<u64>,
    /// Plain text body.
    pub text: Option<String>,
    /// Image reference body.
    pub image: Option<String>,
    /// Encrypted envelope body.
    pub envelope: Option<EncryptedEnvelope>,
}

impl SendRequest {
    /// Validate and convert into a `(target, body)` pair.
    ///
    /// Rejected requests have no side effects anywhere: validation happens
    /// before persistence or emission is attempted.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyPayload`] if no body field is populated or
    ///   the text is empty.
    /// - [`ValidationError::AmbiguousPayload`] if more than one body field is
    ///   populated.
    /// - [`ValidationError::MissingTargetId`] /
    ///   [`ValidationError::UnexpectedTargetId`] on target shape mismatches.
    /// - [`ValidationError::EncryptionIneligible`] if an envelope is addressed
    ///   to a public or group target.
    pub fn normalize(self) -> Result<(ConversationTarget, MessageBody), ValidationError> {
        let target = match (self.target_kind, self.target_id) {
            (TargetKind::Public, None) => ConversationTarget::Public,
            (TargetKind::Public, Some(_)) => return Err(ValidationError::UnexpectedTargetId),
            (TargetKind::Group, Some(id)) => ConversationTarget::Group(GroupId(id)),
            (TargetKind::Direct, Some(id)) => ConversationTarget::Direct(UserId(id)),
            (TargetKind::Group | TargetKind::Direct, None) => {
                return Err(ValidationError::MissingTargetId);
            },
        };

        let body = match (self.text, self.image, self.envelope) {
            (Some(text), None, None) => {
                if text.trim().is_empty() {
                    return Err(ValidationError::EmptyPayload);
                }
                MessageBody::Text(text)
            },
            (None, Some(image), None) => {
                if image.is_empty() {
                    return Err(ValidationError::EmptyPayload);
                }
                MessageBody::Image(image)
            },
            (None, None, Some(envelope)) => {
                if envelope.body.is_empty() {
                    return Err(ValidationError::EmptyPayload);
                }
                MessageBody::Encrypted(envelope)
            },
            (None, None, None) => return Err(ValidationError::EmptyPayload),
            _ => return Err(ValidationError::AmbiguousPayload),
        };

        if body.is_encrypted() && !target.is_encryption_eligible() {
            return Err(ValidationError::EncryptionIneligible);
        }

        Ok((target, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_request(target_kind: TargetKind, target_id: Option<u64>) -> SendRequest {
        SendRequest {
            target_kind,
            target_id,
            text: Some("hi".into()),
            image: None,
            envelope: None,
        }
    }

    fn envelope() -> EncryptedEnvelope {
        EncryptedEnvelope { kind: EnvelopeKind::Normal, body: vec![1, 2, 3], registration_id: 7 }
    }

    #[test]
    fn normalize_public_text() {
        let (target, body) = text_request(TargetKind::Public, None).normalize().unwrap();
        assert_eq!(target, ConversationTarget::Public);
        assert_eq!(body, MessageBody::Text("hi".into()));
    }

    #[test]
    fn normalize_rejects_empty_payload() {
        let request = SendRequest {
            target_kind: TargetKind::Public,
            target_id: None,
            text: None,
            image: None,
            envelope: None,
        };
        assert_eq!(request.normalize().unwrap_err(), ValidationError::EmptyPayload);
    }

    #[test]
    fn normalize_rejects_whitespace_text() {
        let mut request = text_request(TargetKind::Public, None);
        request.text = Some("   ".into());
        assert_eq!(request.normalize().unwrap_err(), ValidationError::EmptyPayload);
    }

    #[test]
    fn normalize_rejects_two_bodies() {
        let mut request = text_request(TargetKind::Public, None);
        request.image = Some("data:image/png;base64,AAAA".into());
        assert_eq!(request.normalize().unwrap_err(), ValidationError::AmbiguousPayload);
    }

    #[test]
    fn normalize_rejects_group_without_id() {
        let request = text_request(TargetKind::Group, None);
        assert_eq!(request.normalize().unwrap_err(), ValidationError::MissingTargetId);
    }

    #[test]
    fn normalize_rejects_envelope_to_group() {
        let request = SendRequest {
            target_kind: TargetKind::Group,
            target_id: Some(9),
            text: None,
            image: None,
            envelope: Some(envelope()),
        };
        assert_eq!(request.normalize().unwrap_err(), ValidationError::EncryptionIneligible);
    }

    #[test]
    fn normalize_accepts_envelope_to_direct() {
        let request = SendRequest {
            target_kind: TargetKind::Direct,
            target_id: Some(3),
            text: None,
            image: None,
            envelope: Some(envelope()),
        };
        let (target, body) = request.normalize().unwrap();
        assert_eq!(target, ConversationTarget::Direct(UserId(3)));
        assert!(body.is_encrypted());
    }

    #[test]
    fn message_body_roundtrips_through_cbor() {
        let body = MessageBody::Encrypted(envelope());
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&body, &mut encoded).unwrap();
        let decoded: MessageBody = ciborium::de::from_reader(encoded.as_slice()).unwrap();
        assert_eq!(decoded, body);
    }
}
