//! Storage abstractions behind the session layer.
//!
//! Session state and identity pins live behind [`SessionStore`]; published
//! bundles are fetched through [`BundleFetcher`]. Both are async so durable
//! or remote backends slot in without touching protocol code; the in-memory
//! implementations here back the tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sotto_crypto::PublicKey;
use sotto_proto::UserId;

use crate::error::StoreError;

/// Key-value persistence for session blobs and identity pins.
///
/// Keys are `(owner, peer)`; the device component of the session address is
/// fixed ([`sotto_proto::DEVICE_ID`]) and therefore implicit. Blobs are
/// opaque CBOR produced by the session layer - backends must not interpret
/// them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session blob for `(owner, peer)`, if one exists.
    async fn load_session(&self, owner: UserId, peer: UserId)
    -> Result<Option<Vec<u8>>, StoreError>;

    /// Write (or overwrite) the session blob for `(owner, peer)`.
    async fn store_session(
        &self,
        owner: UserId,
        peer: UserId,
        blob: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Delete the session blob for `(owner, peer)`. Deleting a missing blob
    /// is not an error.
    async fn delete_session(&self, owner: UserId, peer: UserId) -> Result<(), StoreError>;

    /// Load the pinned identity key for `peer`, if one was recorded.
    async fn load_pinned_identity(
        &self,
        owner: UserId,
        peer: UserId,
    ) -> Result<Option<PublicKey>, StoreError>;

    /// Record `key` as `peer`'s identity.
    async fn pin_identity(
        &self,
        owner: UserId,
        peer: UserId,
        key: PublicKey,
    ) -> Result<(), StoreError>;

    /// Forget the pinned identity for `peer`. Part of an explicit reset:
    /// clearing the pin is what lets a reinstalled peer be trusted again
    /// under trust-on-first-use.
    async fn unpin_identity(&self, owner: UserId, peer: UserId) -> Result<(), StoreError>;
}

/// Fetches a peer's current published bundle, CBOR-encoded.
///
/// Implemented against whatever directory the deployment publishes bundles
/// to; returns `None` when the peer never published.
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    /// Fetch the peer's current bundle blob.
    async fn fetch(&self, peer: UserId) -> Result<Option<Vec<u8>>, StoreError>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn load_session(
        &self,
        owner: UserId,
        peer: UserId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load_session(owner, peer).await
    }

    async fn store_session(
        &self,
        owner: UserId,
        peer: UserId,
        blob: Vec<u8>,
    ) -> Result<(), StoreError> {
        (**self).store_session(owner, peer, blob).await
    }

    async fn delete_session(&self, owner: UserId, peer: UserId) -> Result<(), StoreError> {
        (**self).delete_session(owner, peer).await
    }

    async fn load_pinned_identity(
        &self,
        owner: UserId,
        peer: UserId,
    ) -> Result<Option<PublicKey>, StoreError> {
        (**self).load_pinned_identity(owner, peer).await
    }

    async fn pin_identity(
        &self,
        owner: UserId,
        peer: UserId,
        key: PublicKey,
    ) -> Result<(), StoreError> {
        (**self).pin_identity(owner, peer, key).await
    }

    async fn unpin_identity(&self, owner: UserId, peer: UserId) -> Result<(), StoreError> {
        (**self).unpin_identity(owner, peer).await
    }
}

#[async_trait]
impl<F: BundleFetcher + ?Sized> BundleFetcher for Arc<F> {
    async fn fetch(&self, peer: UserId) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).fetch(peer).await
    }
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<(UserId, UserId), Vec<u8>>>,
    pins: Mutex<HashMap<(UserId, UserId), PublicKey>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(
        &self,
        owner: UserId,
        peer: UserId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lock(&self.sessions)?.get(&(owner, peer)).cloned())
    }

    async fn store_session(
        &self,
        owner: UserId,
        peer: UserId,
        blob: Vec<u8>,
    ) -> Result<(), StoreError> {
        lock(&self.sessions)?.insert((owner, peer), blob);
        Ok(())
    }

    async fn delete_session(&self, owner: UserId, peer: UserId) -> Result<(), StoreError> {
        lock(&self.sessions)?.remove(&(owner, peer));
        Ok(())
    }

    async fn load_pinned_identity(
        &self,
        owner: UserId,
        peer: UserId,
    ) -> Result<Option<PublicKey>, StoreError> {
        Ok(lock(&self.pins)?.get(&(owner, peer)).copied())
    }

    async fn pin_identity(
        &self,
        owner: UserId,
        peer: UserId,
        key: PublicKey,
    ) -> Result<(), StoreError> {
        lock(&self.pins)?.insert((owner, peer), key);
        Ok(())
    }

    async fn unpin_identity(&self, owner: UserId, peer: UserId) -> Result<(), StoreError> {
        lock(&self.pins)?.remove(&(owner, peer));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Backend("session store mutex poisoned".into()))
}
