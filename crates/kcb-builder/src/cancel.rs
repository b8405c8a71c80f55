//! Cancellation while waiting for a build to be scheduled.
//!
//! A [`BuildCancellation`] token is created before submission and receives
//! the build handle exactly once. The interrupt path only ever reads the
//! token. Once log streaming starts, cancellation is detected from the
//! orchestrator's own build status instead.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;

use kcb_core::BuildHandle;

use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;

/// Shared slot for the handle of the build a task owns.
#[derive(Debug, Clone, Default)]
pub struct BuildCancellation {
    handle: Arc<OnceLock<BuildHandle>>,
}

impl BuildCancellation {
    /// Creates an empty token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the build handle. Returns false if one was already set.
    pub fn set_handle(&self, handle: BuildHandle) -> bool {
        self.handle.set(handle).is_ok()
    }

    /// Returns the recorded handle.
    #[must_use]
    pub fn handle(&self) -> Option<&BuildHandle> {
        self.handle.get()
    }
}

/// A future that resolves when the task is interrupted.
pub struct Interrupt {
    signal: BoxFuture<'static, ()>,
}

impl Interrupt {
    /// Resolves on SIGINT (Ctrl-C).
    ///
    /// The handler is installed when the interrupt is first polled.
    #[must_use]
    pub fn ctrl_c() -> Self {
        Self::from_future(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "cannot listen for interrupts");
                std::future::pending::<()>().await;
            }
        })
    }

    /// Resolves when `signal` completes.
    #[must_use]
    pub fn from_future(signal: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            signal: Box::pin(signal),
        }
    }

    /// Never resolves.
    #[must_use]
    pub fn never() -> Self {
        Self::from_future(std::future::pending())
    }

    async fn fired(self) {
        self.signal.await;
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt").finish_non_exhaustive()
    }
}

/// Forwards an interrupt during scheduling to the orchestrator.
pub struct CancellationController {
    orchestrator: Arc<dyn Orchestrator>,
    token: BuildCancellation,
}

impl CancellationController {
    /// Creates a controller reading the build handle from `token`.
    #[must_use]
    pub fn new(orchestrator: Arc<dyn Orchestrator>, token: BuildCancellation) -> Self {
        Self {
            orchestrator,
            token,
        }
    }

    /// Waits for the build to be scheduled unless `interrupt` fires first.
    ///
    /// On interrupt the build is cancelled on the orchestrator before the
    /// cancellation is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the interrupt fired
    /// - [`Error::InvalidRequest`] if no build handle was recorded
    /// - [`Error::Orchestrator`] if waiting failed
    pub async fn wait_until_scheduled(&self, interrupt: Interrupt) -> Result<()> {
        let handle = self
            .token
            .handle()
            .ok_or_else(|| Error::invalid_request("no build to wait for"))?;

        tracing::debug!(build_id = %handle, "waiting for build to be scheduled");
        tokio::select! {
            scheduled = self.orchestrator.wait_for_build_to_get_scheduled(handle) => {
                scheduled?;
                tracing::debug!("build was scheduled");
                Ok(())
            }
            () = interrupt.fired() => {
                self.on_interrupt().await;
                Err(Error::Cancelled {
                    build_id: handle.to_string(),
                })
            }
        }
    }

    async fn on_interrupt(&self) {
        let Some(handle) = self.token.handle() else {
            return;
        };
        tracing::warn!(build_id = %handle, "interrupted, cancelling build");
        if let Err(err) = self.orchestrator.cancel_build(handle).await {
            tracing::error!(build_id = %handle, error = %err, "failed to cancel build");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_accepts_one_handle() {
        let token = BuildCancellation::new();
        assert!(token.handle().is_none());
        assert!(token.set_handle(BuildHandle::new("b-1").unwrap()));
        assert!(!token.set_handle(BuildHandle::new("b-2").unwrap()));

        let shared = token.clone();
        assert_eq!(shared.handle().map(BuildHandle::as_str), Some("b-1"));
    }
}
