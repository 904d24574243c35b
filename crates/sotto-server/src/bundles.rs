//! Published prekey bundle registry.
//!
//! The server stores bundles as opaque CBOR blobs: it routes key material,
//! it never interprets it. Publishing replaces any prior bundle wholesale -
//! there is no versioning and no merge.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sotto_core::{BundleFetcher, StoreError};
use sotto_proto::UserId;

/// Upsert registry of published bundles, keyed by user.
#[derive(Debug, Default)]
pub struct BundleRegistry {
    bundles: Mutex<HashMap<UserId, Vec<u8>>>,
}

impl BundleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `blob` as `user`'s bundle, replacing any previous one.
    pub fn publish(&self, user: UserId, blob: Vec<u8>) {
        self.lock().insert(user, blob);
    }

    /// The current bundle for `peer`, or `None` if never published.
    pub fn fetch(&self, peer: UserId) -> Option<Vec<u8>> {
        self.lock().get(&peer).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, Vec<u8>>> {
        match self.bundles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The session layer's bundle source is this registry, looked up in place.
#[async_trait]
impl BundleFetcher for BundleRegistry {
    async fn fetch(&self, peer: UserId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(Self::fetch(self, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_wholesale() {
        let registry = BundleRegistry::new();
        registry.publish(UserId(1), vec![1, 2, 3]);
        registry.publish(UserId(1), vec![9]);

        assert_eq!(registry.fetch(UserId(1)), Some(vec![9]));
        assert_eq!(registry.fetch(UserId(2)), None);
    }
}
