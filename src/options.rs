use std::collections::BTreeSet;
use std::time::Duration;

/// Configures per-request timeout and retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Upper bound for a single attempt. The caller's deadline wins when
    /// it is closer.
    pub timeout: Duration,
    /// Retry behavior for calls marked safe.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Retry policy applied to safe (idempotent) requests.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Fraction of each delay that is randomized, in `[0, 1]`.
    pub jitter: f64,
    /// Statuses the executor retries. Only narrows the classifier's
    /// verdict: a status the classifier deems permanent is never retried.
    pub retryable_statuses: BTreeSet<u16>,
    /// Whether timeouts, refused connections and DNS/TLS failures are retried.
    pub retry_transport_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
            retryable_statuses: [429, 502, 503, 504].into_iter().collect(),
            retry_transport_errors: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub(crate) fn allows(&self, err: &crate::SdkError) -> bool {
        if !err.is_retryable() {
            return false;
        }
        match err {
            crate::SdkError::Transport { .. } => self.retry_transport_errors,
            other => self.retryable_statuses.contains(&other.status_code()),
        }
    }
}
