//! Append-only message log.
//!
//! The log's write/query contract is deliberately small: append one routed
//! message, read back the messages for a target in append order. It is the
//! sole source of truth - live emission and push are best-effort layers on
//! top, and a reconnecting client reconciles against this log. (For a
//! direct conversation, each side of the pair is its own target; clients
//! query both directions.)
//!
//! Two backends: in-memory for tests, redb for durable single-node
//! deployments.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableTable, TableDefinition};
use sotto_proto::{ChatMessage, ConversationTarget};
use thiserror::Error;

const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");

/// Message log failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("stored message is corrupt")]
    Corrupt,
}

/// Append-only store of routed messages.
pub trait MessageStore: Send + Sync {
    /// Append one message. The message is immutable once this returns.
    fn append(&self, message: &ChatMessage) -> Result<(), StorageError>;

    /// Messages addressed to exactly `target`, in append order.
    fn query(&self, target: &ConversationTarget) -> Result<Vec<ChatMessage>, StorageError>;
}

/// In-memory [`MessageStore`].
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    log: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of appended messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ChatMessage>> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MessageStore for MemoryMessageStore {
    fn append(&self, message: &ChatMessage) -> Result<(), StorageError> {
        self.lock().push(message.clone());
        Ok(())
    }

    fn query(&self, target: &ConversationTarget) -> Result<Vec<ChatMessage>, StorageError> {
        Ok(self.lock().iter().filter(|message| message.target == *target).cloned().collect())
    }
}

/// Durable [`MessageStore`] backed by a redb table.
///
/// Records are CBOR blobs keyed by a monotonic sequence number; append
/// order is key order.
#[derive(Debug)]
pub struct RedbMessageStore {
    db: Database,
    next_seq: AtomicU64,
}

impl RedbMessageStore {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend)?;

        // Resume the sequence after the highest stored key.
        let next_seq = {
            let txn = db.begin_read().map_err(backend)?;
            match txn.open_table(MESSAGES) {
                Ok(table) => table
                    .last()
                    .map_err(backend)?
                    .map_or(0, |(key, _)| key.value() + 1),
                Err(redb::TableError::TableDoesNotExist(_)) => 0,
                Err(error) => return Err(backend(error)),
            }
        };

        Ok(Self { db, next_seq: AtomicU64::new(next_seq) })
    }
}

impl MessageStore for RedbMessageStore {
    fn append(&self, message: &ChatMessage) -> Result<(), StorageError> {
        let mut blob = Vec::new();
        ciborium::ser::into_writer(message, &mut blob).map_err(backend)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(backend)?;
            table.insert(seq, blob.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn query(&self, target: &ConversationTarget) -> Result<Vec<ChatMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = match txn.open_table(MESSAGES) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(error) => return Err(backend(error)),
        };

        let mut messages = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (_, value) = entry.map_err(backend)?;
            let message: ChatMessage =
                ciborium::de::from_reader(value.value()).map_err(|_| StorageError::Corrupt)?;
            if message.target == *target {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

fn backend<E: std::fmt::Display>(error: E) -> StorageError {
    StorageError::Backend(error.to_string())
}

#[cfg(test)]
mod tests {
    use sotto_proto::{GroupId, MessageBody, UserId};

    use super::*;

    fn message(target: ConversationTarget, text: &str, at: u64) -> ChatMessage {
        ChatMessage {
            sender: UserId(1),
            target,
            body: MessageBody::Text(text.into()),
            server_timestamp_ms: at,
        }
    }

    #[test]
    fn memory_store_queries_by_target() {
        let store = MemoryMessageStore::new();
        store.append(&message(ConversationTarget::Public, "a", 1)).unwrap();
        store.append(&message(ConversationTarget::Group(GroupId(7)), "b", 2)).unwrap();
        store.append(&message(ConversationTarget::Public, "c", 3)).unwrap();

        let public = store.query(&ConversationTarget::Public).unwrap();
        assert_eq!(public.len(), 2);
        assert_eq!(public[0].body, MessageBody::Text("a".into()));
        assert_eq!(public[1].body, MessageBody::Text("c".into()));
    }

    #[test]
    fn redb_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.redb");

        let store = RedbMessageStore::open(&path).unwrap();
        store.append(&message(ConversationTarget::Public, "one", 1)).unwrap();
        store.append(&message(ConversationTarget::Public, "two", 2)).unwrap();

        let messages = store.query(&ConversationTarget::Public).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, MessageBody::Text("one".into()));
    }

    #[test]
    fn redb_store_resumes_sequence_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.redb");

        {
            let store = RedbMessageStore::open(&path).unwrap();
            store.append(&message(ConversationTarget::Public, "before", 1)).unwrap();
        }

        let store = RedbMessageStore::open(&path).unwrap();
        store.append(&message(ConversationTarget::Public, "after", 2)).unwrap();

        let messages = store.query(&ConversationTarget::Public).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].body, MessageBody::Text("after".into()));
    }
}
