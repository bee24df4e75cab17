//! Bounded table of recently active viewers.

use std::collections::HashMap;

/// Last activity for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveUserRecord {
    pub last_active_ms: u64,
    pub level: u32,
}

/// Recently seen users, capped at `max_users`.
///
/// Whenever an insert pushes the table past capacity, entries idle for longer
/// than `timeout_ms` are swept. If every entry is still fresh, the least
/// recently active ones go until the cap holds again.
#[derive(Debug)]
pub struct ActiveUserTracker {
    users: HashMap<String, ActiveUserRecord>,
    max_users: usize,
    timeout_ms: u64,
}

impl ActiveUserTracker {
    pub fn new(max_users: usize, timeout_ms: u64) -> Self {
        Self {
            users: HashMap::new(),
            max_users: max_users.max(1),
            timeout_ms,
        }
    }

    /// Insert or refresh a user. Returns how many entries were evicted.
    pub fn touch(&mut self, user_id: &str, level: u32, now_ms: u64) -> usize {
        let record = ActiveUserRecord {
            last_active_ms: now_ms,
            level,
        };
        match self.users.get_mut(user_id) {
            Some(existing) => {
                *existing = record;
                0
            }
            None => {
                self.users.insert(user_id.to_owned(), record);
                if self.users.len() > self.max_users {
                    self.evict(now_ms)
                } else {
                    0
                }
            }
        }
    }

    /// Drop idle entries, then the oldest ones if still over capacity.
    fn evict(&mut self, now_ms: u64) -> usize {
        let before = self.users.len();
        let timeout = self.timeout_ms;
        self.users
            .retain(|_, r| now_ms.saturating_sub(r.last_active_ms) <= timeout);

        if self.users.len() > self.max_users {
            let excess = self.users.len() - self.max_users;
            let mut by_age: Vec<(u64, String)> = self
                .users
                .iter()
                .map(|(id, r)| (r.last_active_ms, id.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, id) in by_age.into_iter().take(excess) {
                self.users.remove(&id);
            }
        }
        let evicted = before - self.users.len();
        tracing::debug!(evicted, remaining = self.users.len(), "active-user sweep");
        evicted
    }

    pub fn get(&self, user_id: &str) -> Option<ActiveUserRecord> {
        self.users.get(user_id).copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_users
    }
}
