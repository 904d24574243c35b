//! Session layer integration tests.
//!
//! Exercises the full asynchronous establishment flow between two
//! [`SessionManager`]s wired to in-memory stores and a shared bundle
//! directory: prekey bootstrap, idempotent and concurrent negotiation,
//! persistence across restart, recoverable decrypt failures, identity
//! pinning, and one-time prekey consumption.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::OsRng;
use sotto_core::{
    AcceptAll, BundleFetcher, MemorySessionStore, NegotiationReason, SessionError, SessionManager,
    StoreError, TrustOnFirstUse,
};
use sotto_core::{PreKeyVault, SessionStore};
use sotto_proto::{EncryptedEnvelope, EnvelopeKind, UserId};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

/// Shared in-memory bundle directory standing in for the server registry.
#[derive(Debug, Default)]
struct BundleDirectory {
    bundles: Mutex<HashMap<UserId, Vec<u8>>>,
}

impl BundleDirectory {
    fn publish(&self, user: UserId, blob: Vec<u8>) {
        self.bundles.lock().unwrap().insert(user, blob);
    }
}

#[async_trait]
impl BundleFetcher for BundleDirectory {
    async fn fetch(&self, peer: UserId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.bundles.lock().unwrap().get(&peer).cloned())
    }
}

type Manager = SessionManager<Arc<MemorySessionStore>, Arc<BundleDirectory>, TrustOnFirstUse>;

struct World {
    directory: Arc<BundleDirectory>,
}

impl World {
    fn new() -> Self {
        Self { directory: Arc::new(BundleDirectory::default()) }
    }

    /// Create a manager for `user` with its own store and publish its
    /// bundle.
    fn join(&self, user: UserId) -> Manager {
        self.join_with_store(user, Arc::new(MemorySessionStore::new()))
    }

    fn join_with_store(&self, user: UserId, store: Arc<MemorySessionStore>) -> Manager {
        let vault = PreKeyVault::generate(&mut OsRng, user, 4);
        let manager =
            SessionManager::new(vault, store, Arc::clone(&self.directory), TrustOnFirstUse);
        self.directory.publish(user, manager.publish_bundle().unwrap());
        manager
    }
}

#[tokio::test]
async fn first_message_bootstraps_and_later_messages_are_normal() {
    let world = World::new();
    let alice = world.join(ALICE);
    let bob = world.join(BOB);

    alice.negotiate(&mut OsRng, BOB, false).await.unwrap();

    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    assert_eq!(hello.kind, EnvelopeKind::PreKey);

    // Bob never negotiated; the prekey envelope bootstraps his session.
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap(), b"hello");

    let world_msg = alice.encrypt(&mut OsRng, BOB, b"world").await.unwrap();
    assert_eq!(world_msg.kind, EnvelopeKind::Normal);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &world_msg).await.unwrap(), b"world");

    // And the channel works in the other direction.
    let reply = bob.encrypt(&mut OsRng, ALICE, b"hi alice").await.unwrap();
    assert_eq!(alice.decrypt(&mut OsRng, BOB, &reply).await.unwrap(), b"hi alice");
}

#[tokio::test]
async fn encrypt_negotiates_lazily_without_explicit_call() {
    let world = World::new();
    let alice = world.join(ALICE);
    let bob = world.join(BOB);

    let envelope = alice.encrypt(&mut OsRng, BOB, b"lazy").await.unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::PreKey);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &envelope).await.unwrap(), b"lazy");
}

#[tokio::test]
async fn repeated_negotiation_is_a_no_op() {
    let world = World::new();
    let alice = world.join(ALICE);
    let bob = world.join(BOB);

    alice.negotiate(&mut OsRng, BOB, false).await.unwrap();
    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap();

    // A second negotiation must not replace the established session: the
    // next envelope continues the existing chain instead of restarting it.
    alice.negotiate(&mut OsRng, BOB, false).await.unwrap();
    let next = alice.encrypt(&mut OsRng, BOB, b"still here").await.unwrap();
    assert_eq!(next.kind, EnvelopeKind::Normal);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &next).await.unwrap(), b"still here");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_negotiations_converge_to_one_session() {
    let world = World::new();
    let alice = Arc::new(world.join(ALICE));
    let bob = world.join(BOB);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&alice);
        tasks.push(tokio::spawn(
            async move { manager.negotiate(&mut OsRng, BOB, false).await },
        ));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Exactly one usable session: the first envelope bootstraps, the second
    // continues it.
    let first = alice.encrypt(&mut OsRng, BOB, b"one").await.unwrap();
    assert_eq!(first.kind, EnvelopeKind::PreKey);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &first).await.unwrap(), b"one");

    let second = alice.encrypt(&mut OsRng, BOB, b"two").await.unwrap();
    assert_eq!(second.kind, EnvelopeKind::Normal);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &second).await.unwrap(), b"two");
}

#[tokio::test]
async fn session_survives_restart_through_the_store() {
    let world = World::new();
    let store = Arc::new(MemorySessionStore::new());
    let alice = world.join_with_store(ALICE, Arc::clone(&store));
    let bob = world.join(BOB);

    let first = alice.encrypt(&mut OsRng, BOB, b"before restart").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &first).await.unwrap();
    drop(alice);

    // A new manager over the same store resumes the session blob; the next
    // envelope continues the chain.
    let vault = PreKeyVault::generate(&mut OsRng, ALICE, 4);
    let restarted =
        SessionManager::new(vault, store, Arc::clone(&world.directory), TrustOnFirstUse);
    let second = restarted.encrypt(&mut OsRng, BOB, b"after restart").await.unwrap();
    assert_eq!(second.kind, EnvelopeKind::Normal);
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &second).await.unwrap(), b"after restart");
}

#[tokio::test]
async fn decrypt_failure_leaves_the_session_usable() {
    let world = World::new();
    let alice = world.join(ALICE);
    let bob = world.join(BOB);

    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap();

    let garbage = EncryptedEnvelope {
        kind: EnvelopeKind::Normal,
        body: vec![0xDE, 0xAD, 0xBE, 0xEF],
        registration_id: 0,
    };
    let result = bob.decrypt(&mut OsRng, ALICE, &garbage).await;
    assert!(matches!(result, Err(SessionError::Undecryptable)));

    // The failed attempt must not have advanced or corrupted state.
    let after = alice.encrypt(&mut OsRng, BOB, b"still fine").await.unwrap();
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &after).await.unwrap(), b"still fine");
}

#[tokio::test]
async fn normal_envelope_without_a_session_is_rejected() {
    let world = World::new();
    let bob = world.join(BOB);

    let envelope =
        EncryptedEnvelope { kind: EnvelopeKind::Normal, body: vec![1, 2, 3], registration_id: 0 };
    let result = bob.decrypt(&mut OsRng, ALICE, &envelope).await;
    assert!(matches!(result, Err(SessionError::NoSession(ALICE))));
}

#[tokio::test]
async fn corrupt_blob_forces_fresh_negotiation_and_documented_desync() {
    let world = World::new();
    let store = Arc::new(MemorySessionStore::new());
    let alice = world.join_with_store(ALICE, Arc::clone(&store));
    let bob = world.join(BOB);

    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap();
    // Bob republishes so the next negotiation gets a fresh one-time prekey.
    world.directory.publish(BOB, bob.publish_bundle().unwrap());

    // Corrupt Alice's stored session; her next encrypt renegotiates.
    store.store_session(ALICE, BOB, vec![0xFF; 8]).await.unwrap();
    let renegotiated = alice.encrypt(&mut OsRng, BOB, b"take two").await.unwrap();
    assert_eq!(renegotiated.kind, EnvelopeKind::PreKey);

    // Bob still holds the old session, so the two sides are desynchronized
    // until he resets; renegotiation does not heal both ends on its own.
    let result = bob.decrypt(&mut OsRng, ALICE, &renegotiated).await;
    assert!(matches!(result, Err(SessionError::Undecryptable)));

    bob.reset(ALICE).await.unwrap();
    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &renegotiated).await.unwrap(), b"take two");
}

#[tokio::test]
async fn identity_change_is_rejected_until_reset() {
    let world = World::new();
    let alice = world.join(ALICE);
    let bob = world.join(BOB);

    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap();

    // Bob "reinstalls": a new identity appears under the same user id.
    let reinstalled = world.join(BOB);

    let result = alice.negotiate(&mut OsRng, BOB, true).await;
    assert!(matches!(
        result,
        Err(SessionError::Negotiation { peer: BOB, reason: NegotiationReason::UntrustedIdentity })
    ));

    // An explicit reset forgets the pin; the new identity is then accepted.
    alice.reset(BOB).await.unwrap();
    let fresh = alice.encrypt(&mut OsRng, BOB, b"hello again").await.unwrap();
    assert_eq!(fresh.kind, EnvelopeKind::PreKey);
    assert_eq!(reinstalled.decrypt(&mut OsRng, ALICE, &fresh).await.unwrap(), b"hello again");
}

#[tokio::test]
async fn one_time_prekeys_are_single_use() {
    let world = World::new();
    let alice = world.join(ALICE);
    let carol = world.join(CAROL);
    let bob = world.join(BOB);

    // Alice and Carol both initiate against the same published bundle, so
    // both reference the same one-time prekey.
    let from_alice = alice.encrypt(&mut OsRng, BOB, b"from alice").await.unwrap();
    let from_carol = carol.encrypt(&mut OsRng, BOB, b"from carol").await.unwrap();

    assert_eq!(bob.decrypt(&mut OsRng, ALICE, &from_alice).await.unwrap(), b"from alice");

    // The prekey was consumed by Alice's bootstrap; Carol's cannot reuse it.
    let result = bob.decrypt(&mut OsRng, CAROL, &from_carol).await;
    assert!(matches!(
        result,
        Err(SessionError::Negotiation {
            peer: CAROL,
            reason: NegotiationReason::OneTimePreKeyConsumed
        })
    ));
}

#[tokio::test]
async fn missing_bundle_fails_negotiation() {
    let world = World::new();
    let alice = world.join(ALICE);

    let result = alice.encrypt(&mut OsRng, UserId(99), b"anyone there?").await;
    assert!(matches!(result, Err(SessionError::BundleNotFound(UserId(99)))));
}

#[tokio::test]
async fn accept_all_policy_allows_identity_changes() {
    let world = World::new();
    let store = Arc::new(MemorySessionStore::new());
    let vault = PreKeyVault::generate(&mut OsRng, ALICE, 4);
    let alice = SessionManager::new(vault, store, Arc::clone(&world.directory), AcceptAll);
    world.directory.publish(ALICE, alice.publish_bundle().unwrap());

    let bob = world.join(BOB);
    let hello = alice.encrypt(&mut OsRng, BOB, b"hello").await.unwrap();
    bob.decrypt(&mut OsRng, ALICE, &hello).await.unwrap();

    // Reinstalled Bob is accepted without a reset under AcceptAll.
    let _reinstalled = world.join(BOB);
    alice.negotiate(&mut OsRng, BOB, true).await.unwrap();
}
