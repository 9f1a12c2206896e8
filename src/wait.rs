//! Polling for asynchronous state transitions.
//!
//! [`wait`] drives a caller-supplied probe until it reports a terminal
//! state, a polling budget runs out, or the [`CallContext`] ends the call.
//! Resource helpers such as "wait for server ACTIVE" are thin closures over
//! [`wait_for_status`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{CallContext, Result, SdkError};

/// Polling cadence and budget for one [`wait`] call.
///
/// Whichever bound is hit first ends the wait: `max_attempts`, `max_wait`,
/// or the context deadline.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitSpec {
    pub poll_interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_wait: Option<Duration>,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: None,
            max_wait: Some(Duration::from_secs(600)),
        }
    }
}

impl WaitSpec {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Drops the wall-clock budget, leaving attempts and the context
    /// deadline as the only bounds.
    pub fn without_max_wait(mut self) -> Self {
        self.max_wait = None;
        self
    }
}

/// What one probe observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Still transitioning.
    Pending(String),
    Succeeded(String),
    /// Explicit failure state; polling stops.
    Failed(String),
}

impl ProbeOutcome {
    /// Builds an outcome from success/failure flags. Failure wins when both
    /// are set.
    pub fn from_flags(succeeded: bool, failed: bool, state: impl Into<String>) -> Self {
        let state = state.into();
        if failed {
            Self::Failed(state)
        } else if succeeded {
            Self::Succeeded(state)
        } else {
            Self::Pending(state)
        }
    }

    pub fn state(&self) -> &str {
        match self {
            Self::Pending(state) | Self::Succeeded(state) | Self::Failed(state) => state,
        }
    }
}

/// Polls `probe` until it reports a terminal state.
///
/// - `Succeeded` returns `Ok(())`.
/// - `Failed` returns [`SdkError::WaitFailed`] immediately.
/// - A probe error that is not transient (e.g. 404 because the resource was
///   deleted mid-wait) is returned as-is.
/// - Running out of attempts, wall-clock budget or context deadline returns
///   [`SdkError::WaitTimedOut`].
/// - Cancellation returns [`SdkError::Cancelled`].
pub async fn wait<F, Fut>(ctx: &CallContext, spec: &WaitSpec, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ProbeOutcome>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut last_state: Option<String> = None;
    let mut last_error: Option<SdkError> = None;

    let timed_out = |attempts: u32, last_state: Option<String>, last_error: Option<SdkError>| {
        SdkError::WaitTimedOut {
            attempts,
            elapsed: started.elapsed(),
            last_state,
            last_error: last_error.map(Box::new),
        }
    };

    loop {
        attempts += 1;
        match ctx.run(probe()).await {
            Ok(ProbeOutcome::Succeeded(_state)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts, state = %_state, "wait succeeded");
                return Ok(());
            }
            Ok(ProbeOutcome::Failed(state)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts, state = %state, "wait observed failure state");
                return Err(SdkError::WaitFailed { state });
            }
            Ok(ProbeOutcome::Pending(state)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts, state = %state, "resource still pending");
                last_state = Some(state);
                last_error = None;
            }
            Err(SdkError::Cancelled) => return Err(SdkError::Cancelled),
            Err(SdkError::DeadlineExceeded { .. }) => {
                return Err(timed_out(attempts, last_state, last_error));
            }
            Err(err) if is_transient(&err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts, error = %err, "probe failed transiently");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }

        let out_of_attempts = spec.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_budget = spec
            .max_wait
            .is_some_and(|max| started.elapsed().saturating_add(spec.poll_interval) > max);
        let past_deadline = ctx
            .remaining()
            .is_some_and(|remaining| remaining <= spec.poll_interval);
        if out_of_attempts || out_of_budget || past_deadline {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempts,
                out_of_attempts,
                out_of_budget,
                past_deadline,
                "wait budget exhausted"
            );
            return Err(timed_out(attempts, last_state, last_error));
        }

        match ctx.sleep(spec.poll_interval).await {
            Ok(()) => {}
            Err(SdkError::DeadlineExceeded { .. }) => {
                return Err(timed_out(attempts, last_state, last_error));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Transient failures keep the wait going; a retry loop that gave up on a
/// transient failure counts too.
fn is_transient(err: &SdkError) -> bool {
    match err {
        SdkError::RetriesExhausted { last, .. } => last.is_retryable(),
        other => other.is_retryable(),
    }
}

/// Status reported by a resource, e.g. `BUILD` plus an optional reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedStatus {
    pub status: String,
    pub reason: Option<String>,
}

impl ObservedStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn describe(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} (status_reason: {reason})", self.status),
            None => self.status.clone(),
        }
    }
}

type StatusPredicate = Box<dyn Fn(&ObservedStatus) -> bool + Send + Sync>;

/// Success and failure predicates for [`wait_for_status`].
pub struct TerminalStates {
    success: StatusPredicate,
    failure: StatusPredicate,
}

impl fmt::Debug for TerminalStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalStates").finish_non_exhaustive()
    }
}

impl TerminalStates {
    pub fn new<S, F>(success: S, failure: F) -> Self
    where
        S: Fn(&ObservedStatus) -> bool + Send + Sync + 'static,
        F: Fn(&ObservedStatus) -> bool + Send + Sync + 'static,
    {
        Self {
            success: Box::new(success),
            failure: Box::new(failure),
        }
    }

    /// Exact, case-sensitive status matches.
    pub fn status_in(success: &[&str], failure: &[&str]) -> Self {
        let success: Vec<String> = success.iter().map(|s| (*s).to_owned()).collect();
        let failure: Vec<String> = failure.iter().map(|s| (*s).to_owned()).collect();
        Self::new(
            move |observed| success.iter().any(|s| *s == observed.status),
            move |observed| failure.iter().any(|s| *s == observed.status),
        )
    }

    pub fn outcome(&self, observed: &ObservedStatus) -> ProbeOutcome {
        ProbeOutcome::from_flags(
            (self.success)(observed),
            (self.failure)(observed),
            observed.describe(),
        )
    }
}

/// Polls `fetch` and applies `terminal` to every observed status.
pub async fn wait_for_status<F, Fut>(
    ctx: &CallContext,
    spec: &WaitSpec,
    terminal: &TerminalStates,
    mut fetch: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ObservedStatus>>,
{
    wait(ctx, spec, || {
        let observed = fetch();
        async move { observed.await.map(|status| terminal.outcome(&status)) }
    })
    .await
}
