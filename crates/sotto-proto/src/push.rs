//! Push subscription records and redacted previews.

use serde::{Deserialize, Serialize};

/// Preview text shown for payloads whose content must not enter a push
/// channel.
pub const PREVIEW_PLACEHOLDER: &str = "New message";

/// Web-push key material supplied by the client's user agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    /// Client public key for payload encryption.
    pub p256dh: String,
    /// Client authentication secret.
    pub auth: String,
}

/// One push channel per user.
///
/// Overwritten wholesale on refresh; deleted when the push service reports
/// the subscription permanently gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Encryption keys for the channel.
    pub keys: PushKeys,
}

/// What a push notification is allowed to reveal.
///
/// Encrypted payloads never produce a [`PushPreview::Text`]; decrypted or
/// plaintext-equivalent content must not cross into a push payload for an
/// encrypted channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushPreview {
    /// Plain text preview, permitted only for unencrypted payloads under a
    /// policy that allows it.
    Text(String),
    /// The fixed non-revealing placeholder.
    Placeholder,
}

impl PushPreview {
    /// The string to place in the notification body.
    pub fn render(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Placeholder => PREVIEW_PLACEHOLDER,
        }
    }
}
