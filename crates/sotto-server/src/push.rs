//! Push fallback for offline recipients.
//!
//! After a group or direct fanout, recipients without a live connection get
//! one best-effort notification each. Dispatch is fire-and-forget: one task
//! per recipient, failures isolated, nothing retried, nothing surfaced to
//! the sender.
//!
//! # Preview redaction
//!
//! The preview for an encrypted payload is always the fixed placeholder -
//! plaintext-equivalent content must never enter the push channel for an
//! encrypted conversation. Plain text payloads show their text only when
//! [`PushConfig::plaintext_previews`] allows it; image payloads show the
//! placeholder.
//!
//! # Pruning
//!
//! A dispatch outcome of [`PushOutcome::Gone`] means the subscription is
//! permanently invalid: it is deleted, and later sends skip the user
//! without contacting the push channel until they re-register.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sotto_proto::{MessageBody, PushPreview, PushSubscription, UserId};
use tokio::task::JoinHandle;

/// Result of one push dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The push service accepted the notification.
    Delivered,
    /// The subscription is permanently invalid and must be pruned.
    Gone,
    /// Any other failure; logged and not retried.
    Error(String),
}

/// The push channel itself (web-push endpoint, APNs bridge, test double).
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver one notification to one subscription.
    async fn dispatch(&self, subscription: &PushSubscription, preview: &PushPreview)
    -> PushOutcome;
}

/// One subscription per user, upsert on refresh.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    subscriptions: Mutex<HashMap<UserId, PushSubscription>>,
}

impl SubscriptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) `user`'s subscription.
    pub fn register(&self, user: UserId, subscription: PushSubscription) {
        self.lock().insert(user, subscription);
    }

    /// The current subscription for `user`.
    pub fn get(&self, user: UserId) -> Option<PushSubscription> {
        self.lock().get(&user).cloned()
    }

    /// Delete `user`'s subscription.
    pub fn remove(&self, user: UserId) {
        self.lock().remove(&user);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, PushSubscription>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Preview policy.
#[derive(Debug, Clone, Copy)]
pub struct PushConfig {
    /// Whether unencrypted text may appear verbatim in previews. Encrypted
    /// payloads are unaffected: they always get the placeholder.
    pub plaintext_previews: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { plaintext_previews: true }
    }
}

/// Build the redacted preview for a payload under `config`.
pub fn redact(body: &MessageBody, config: &PushConfig) -> PushPreview {
    match body {
        MessageBody::Text(text) if config.plaintext_previews => PushPreview::Text(text.clone()),
        MessageBody::Text(_) | MessageBody::Image(_) | MessageBody::Encrypted(_) => {
            PushPreview::Placeholder
        },
    }
}

/// Fans one preview out to a set of offline recipients.
#[derive(Clone)]
pub struct PushFallback {
    gateway: Arc<dyn PushGateway>,
    subscriptions: Arc<SubscriptionStore>,
}

impl PushFallback {
    /// Wire a gateway to the subscription store.
    pub fn new(gateway: Arc<dyn PushGateway>, subscriptions: Arc<SubscriptionStore>) -> Self {
        Self { gateway, subscriptions }
    }

    /// The subscription store this fallback consults and prunes.
    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }

    /// Dispatch `preview` to every recipient with a registered
    /// subscription, one independent task each.
    ///
    /// Recipients without a subscription are skipped without contacting the
    /// push channel. The returned handles exist for tests and shutdown
    /// draining; the router ignores them.
    pub fn notify(&self, recipients: &[UserId], preview: &PushPreview) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for &user in recipients {
            let Some(subscription) = self.subscriptions.get(user) else {
                continue;
            };
            let gateway = Arc::clone(&self.gateway);
            let subscriptions = Arc::clone(&self.subscriptions);
            let preview = preview.clone();

            handles.push(tokio::spawn(async move {
                match gateway.dispatch(&subscription, &preview).await {
                    PushOutcome::Delivered => {
                        tracing::debug!(%user, "push delivered");
                    },
                    PushOutcome::Gone => {
                        tracing::info!(%user, "push subscription gone; pruning");
                        subscriptions.remove(user);
                    },
                    PushOutcome::Error(reason) => {
                        tracing::warn!(%user, %reason, "push delivery failed");
                    },
                }
            }));
        }
        handles
    }
}

impl std::fmt::Debug for PushFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushFallback").finish()
    }
}
