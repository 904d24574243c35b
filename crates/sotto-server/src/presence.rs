//! Online/offline tracking.
//!
//! Counts live connections per user; a user is online while at least one
//! connection is registered. Consulted by the push fallback to decide who
//! needs an offline notification.

use std::collections::HashMap;
use std::sync::Mutex;

use sotto_proto::UserId;

/// Connection-count presence map.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    counts: Mutex<HashMap<UserId, u32>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection for `user`.
    pub fn connected(&self, user: UserId) {
        let mut counts = self.lock();
        *counts.entry(user).or_insert(0) += 1;
    }

    /// Record a disconnect for `user`.
    pub fn disconnected(&self, user: UserId) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(&user) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&user);
            }
        }
    }

    /// Whether `user` has at least one live connection.
    pub fn is_online(&self, user: UserId) -> bool {
        self.lock().contains_key(&user)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, u32>> {
        match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_while_any_connection_remains() {
        let presence = PresenceTracker::new();
        let user = UserId(1);

        assert!(!presence.is_online(user));
        presence.connected(user);
        presence.connected(user);
        presence.disconnected(user);
        assert!(presence.is_online(user));
        presence.disconnected(user);
        assert!(!presence.is_online(user));
    }

    #[test]
    fn disconnect_without_connect_is_harmless() {
        let presence = PresenceTracker::new();
        presence.disconnected(UserId(1));
        assert!(!presence.is_online(UserId(1)));
    }
}
