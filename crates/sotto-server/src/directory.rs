//! User and group membership seams.
//!
//! Account and group CRUD live in an external collaborator; the router only
//! needs two questions answered: does this user exist, and who is in this
//! group. The in-memory implementation backs tests and small deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sotto_proto::{GroupId, UserId};

/// Resolves group membership.
pub trait GroupDirectory: Send + Sync {
    /// Members of `group`, or `None` if the group does not exist.
    fn members(&self, group: GroupId) -> Option<Vec<UserId>>;

    /// Whether `user` belongs to `group`.
    fn is_member(&self, group: GroupId, user: UserId) -> bool {
        self.members(group).is_some_and(|members| members.contains(&user))
    }
}

/// Resolves user existence.
pub trait UserDirectory: Send + Sync {
    /// Whether `user` is a registered account.
    fn exists(&self, user: UserId) -> bool;
}

/// In-memory directory implementing both seams.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: Mutex<HashSet<UserId>>,
    groups: Mutex<HashMap<GroupId, HashSet<UserId>>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn add_user(&self, user: UserId) {
        lock(&self.users).insert(user);
    }

    /// Create a group with the given members (members are also registered
    /// as users).
    pub fn add_group(&self, group: GroupId, members: &[UserId]) {
        let mut users = lock(&self.users);
        users.extend(members.iter().copied());
        drop(users);
        lock(&self.groups).insert(group, members.iter().copied().collect());
    }
}

impl GroupDirectory for MemoryDirectory {
    fn members(&self, group: GroupId) -> Option<Vec<UserId>> {
        lock(&self.groups).get(&group).map(|members| members.iter().copied().collect())
    }
}

impl UserDirectory for MemoryDirectory {
    fn exists(&self, user: UserId) -> bool {
        lock(&self.users).contains(&user)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
