//! Explicit cancellation value threaded through every blocking call.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::{Result, SdkError};

/// Deadline and cancellation signal for one logical call.
///
/// Cloning is cheap; clones observe the same cancel signal. A context
/// created with [`CallContext::background`] never expires and can't be
/// cancelled.
#[derive(Clone, Debug)]
pub struct CallContext {
    started: Instant,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`CallContext`] derived from [`CallContext::cancellable`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    pub fn background() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
            cancel: None,
        }
    }

    /// Creates a context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            ..Self::background()
        };
        (ctx, CancelHandle { tx })
    }

    /// Tightens the deadline to `timeout` from now. An earlier existing
    /// deadline is kept. A timeout too large to represent as an instant
    /// leaves the context unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Returns the error this context would end a call with right now.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SdkError::Cancelled)
        } else if self.is_expired() {
            Err(self.deadline_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn deadline_error(&self) -> SdkError {
        SdkError::DeadlineExceeded {
            elapsed: self.started.elapsed(),
        }
    }

    /// Resolves once the context is cancelled. Pending forever otherwise.
    pub async fn cancelled(&self) {
        match &self.cancel {
            Some(rx) => {
                let mut rx = rx.clone();
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // Handle dropped without cancelling.
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Runs `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SdkError::Cancelled),
            _ = self.expired() => Err(self.deadline_error()),
            out = fut => out,
        }
    }

    /// Sleeps for `duration`, returning early with an error on cancellation
    /// or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok::<_, SdkError>(())
        })
        .await
    }
}
