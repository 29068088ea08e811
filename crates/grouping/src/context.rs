//! Per-request cancellation and deadline

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trafficlight_core::{Error, Result};

/// Cancellation signal and optional deadline carried by one inbound request
///
/// Derived contexts share cancellation with their parent: cancelling the
/// parent cancels every context derived from it, never the other way round.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Wrap an existing cancellation token
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that expires `timeout` from now, or at the parent's
    /// deadline if that is sooner
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, or at the parent's
    /// deadline if that is sooner
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context that can be cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context was cancelled or its deadline has passed
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Return `Err(Cancelled)` once the context is done
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled("context cancelled"));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::cancelled("context deadline exceeded"))
            }
            _ => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Drive `fut` unless the context finishes first
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.done() => {
                Err(self.check().err().unwrap_or_else(|| Error::cancelled("context cancelled")))
            }
            result = fut => result,
        }
    }
}
