//! Coordinator tuning knobs.

use std::time::Duration;

/// Timing and concurrency settings for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Deployment environment name, reported in logs.
    pub environment: String,
    /// An agent whose last successful status is older than this is OFFLINE.
    pub status_expiration: Duration,
    /// Per-call deadline for every agent RPC.
    pub agent_timeout: Duration,
    /// Upper bound on status fetches in flight during one refresh.
    pub max_concurrent_refreshes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            status_expiration: Duration::from_secs(30),
            agent_timeout: Duration::from_secs(5),
            max_concurrent_refreshes: 16,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_status_expiration(mut self, expiration: Duration) -> Self {
        self.status_expiration = expiration;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Zero is treated as one.
    pub fn with_max_concurrent_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_refreshes = max.max(1);
        self
    }
}
