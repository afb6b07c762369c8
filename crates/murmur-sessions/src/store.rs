use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use murmur_core::types::{Role, Turn};

/// Per-user conversation history, bounded and idle-expired.
///
/// Thread-safe: the map is sharded and each user's session is mutated under
/// its own entry lock, so different users proceed in parallel while appends
/// for one user are serialized.
///
/// Expiry is lazy on access (a stale session is purged before it is read or
/// written) plus a periodic `sweep_expired` driven by the caller, so idle
/// memory is reclaimed even without traffic.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    max_history: usize,
    idle_timeout: Duration,
}

struct Session {
    turns: VecDeque<Turn>,
    last_activity: Instant,
}

impl Session {
    fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            last_activity: Instant::now(),
        }
    }

    fn expired(&self, idle_timeout: Duration) -> bool {
        self.last_activity.elapsed() > idle_timeout
    }
}

impl SessionStore {
    pub fn new(max_history: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_history,
            idle_timeout,
        }
    }

    /// Append a turn to the user's history.
    ///
    /// The oldest turn is evicted once the history exceeds `max_history`.
    /// A session that sat idle past the timeout is reset first, so a stale
    /// conversation never leaks into a new one.
    pub fn add_turn(&self, user_id: &str, role: Role, content: impl Into<String>) {
        let mut entry = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(self.max_history));

        if entry.expired(self.idle_timeout) {
            debug!(user_id, "resetting expired session on write");
            entry.turns.clear();
        }

        entry.turns.push_back(Turn::new(role, content));
        while entry.turns.len() > self.max_history {
            entry.turns.pop_front();
        }
        entry.last_activity = Instant::now();
    }

    /// The most recent turns in chronological order.
    ///
    /// `limit` caps the result to that many trailing turns; `None` (or zero)
    /// returns the full history. An expired session is purged and yields an
    /// empty history instead of stale turns.
    pub fn history(&self, user_id: &str, limit: Option<usize>) -> Vec<Turn> {
        if self
            .sessions
            .remove_if(user_id, |_, session| session.expired(self.idle_timeout))
            .is_some()
        {
            debug!(user_id, "purged expired session on read");
            return Vec::new();
        }

        let Some(session) = self.sessions.get(user_id) else {
            return Vec::new();
        };

        let skip = match limit {
            Some(limit) if limit > 0 => session.turns.len().saturating_sub(limit),
            _ => 0,
        };
        session.turns.iter().skip(skip).cloned().collect()
    }

    /// Drop the user's session entirely. No-op when absent.
    pub fn clear(&self, user_id: &str) {
        self.sessions.remove(user_id);
    }

    /// Purge every session idle past the timeout, returning the count.
    pub fn sweep_expired(&self) -> usize {
        let mut purged = 0;
        self.sessions.retain(|_, session| {
            if session.expired(self.idle_timeout) {
                purged += 1;
                false
            } else {
                true
            }
        });
        if purged > 0 {
            debug!(purged, "expiry sweep removed idle sessions");
        }
        purged
    }
}
