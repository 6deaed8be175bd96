//! Read-your-writes session tracking.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Identifies one logical caller across queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A session and the time of its latest write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencySession {
    pub id: SessionId,
    pub last_write_at: Instant,
}

/// Latest write per session. Entries older than the stickiness window carry
/// no routing weight and are pruned.
#[derive(Debug, Default)]
pub struct SessionTracker {
    last_writes: DashMap<SessionId, Instant>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, session: SessionId) {
        self.last_writes.insert(session, Instant::now());
    }

    pub fn get(&self, session: &SessionId) -> Option<ConsistencySession> {
        self.last_writes
            .get(session)
            .map(|entry| ConsistencySession {
                id: *entry.key(),
                last_write_at: *entry.value(),
            })
    }

    pub fn elapsed_since_write(&self, session: &SessionId) -> Option<Duration> {
        self.get(session).map(|s| s.last_write_at.elapsed())
    }

    /// Drop sessions whose last write is at least `window` old.
    pub fn prune(&self, window: Duration) -> usize {
        let before = self.last_writes.len();
        self.last_writes.retain(|_, at| at.elapsed() < window);
        before.saturating_sub(self.last_writes.len())
    }

    pub fn len(&self) -> usize {
        self.last_writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_writes.is_empty()
    }
}
