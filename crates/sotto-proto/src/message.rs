//! The persisted message record.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::payload::MessageBody;
use crate::target::ConversationTarget;

/// A routed message, exactly as it is persisted and emitted.
///
/// Immutable once appended to the log; the log is the sole source of truth a
/// client can reconcile against after reconnecting. The timestamp is assigned
/// by the server at routing time, never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Authenticated sender.
    pub sender: UserId,
    /// Resolved conversation target.
    pub target: ConversationTarget,
    /// Validated payload.
    pub body: MessageBody,
    /// Server-assigned timestamp, milliseconds since the Unix epoch.
    pub server_timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_roundtrips_through_cbor() {
        let message = ChatMessage {
            sender: UserId(12),
            target: ConversationTarget::Direct(UserId(34)),
            body: MessageBody::Text("hello".into()),
            server_timestamp_ms: 1_700_000_000_000,
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&message, &mut encoded).unwrap();
        let decoded: ChatMessage = ciborium::de::from_reader(encoded.as_slice()).unwrap();
        assert_eq!(decoded, message);
    }
}
