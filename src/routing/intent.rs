//! Query intent and per-call options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::consistency::SessionId;

/// Freshness a read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Must observe every committed write: primary only.
    Strong,
    /// Any replica within `max_staleness_ms` (unbounded when unset).
    #[default]
    Eventual,
    /// Read-your-writes for the caller's session.
    Session,
}

/// What the router knows about a query when deciding where it goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub is_write: bool,
    pub consistency: Consistency,
    /// Only meaningful for `Eventual`; `Some(0)` is equivalent to `Strong`.
    pub max_staleness_ms: Option<u64>,
    pub preferred_region: Option<String>,
    pub force_primary: bool,
    /// Offload-only read: the primary must not serve it.
    pub replica_only: bool,
    pub session: Option<SessionId>,
}

impl QueryIntent {
    pub fn read() -> Self {
        Self::default()
    }

    pub fn write() -> Self {
        Self {
            is_write: true,
            ..Self::default()
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_max_staleness_ms(mut self, max_staleness_ms: u64) -> Self {
        self.max_staleness_ms = Some(max_staleness_ms);
        self
    }

    pub fn with_preferred_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    pub fn with_force_primary(mut self) -> Self {
        self.force_primary = true;
        self
    }

    pub fn with_replica_only(mut self) -> Self {
        self.replica_only = true;
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for [`Router::select_with`](crate::routing::Router::select_with).
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub consistency: Consistency,
    pub max_staleness_ms: Option<u64>,
    pub preferred_region: Option<String>,
    pub force_primary: bool,
    pub replica_only: bool,
    pub session: Option<SessionId>,
    /// Per-call deadline; the configured dispatch timeout when unset.
    pub timeout: Option<Duration>,
    /// Overrides `routing.retry_on_timeout` for this read.
    pub retry_on_timeout: Option<bool>,
    pub cancel: CancellationToken,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.consistency = Consistency::Eventual;
        self.max_staleness_ms = Some(u64::try_from(max_staleness.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_preferred_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    pub fn with_force_primary(mut self) -> Self {
        self.force_primary = true;
        self
    }

    pub fn with_replica_only(mut self) -> Self {
        self.replica_only = true;
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = Some(retry);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn intent(&self) -> QueryIntent {
        QueryIntent {
            is_write: false,
            consistency: self.consistency,
            max_staleness_ms: self.max_staleness_ms,
            preferred_region: self.preferred_region.clone(),
            force_primary: self.force_primary,
            replica_only: self.replica_only,
            session: self.session,
        }
    }
}

/// Options for [`Router::mutate_with`](crate::routing::Router::mutate_with).
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Session whose later reads must observe this write.
    pub session: Option<SessionId>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn intent(&self) -> QueryIntent {
        QueryIntent {
            session: self.session,
            ..QueryIntent::write()
        }
    }
}
