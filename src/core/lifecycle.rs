//! Run/drain/stop state of the relay.
//!
//! The state machine is linear: `Running → Draining → Stopped`. The current
//! state is published on a watch channel so other tasks can observe it, and a
//! [`CancellationToken`] carries the shutdown request into every wait that
//! must be interruptible (the inter-tick sleep and the Queue-Full wait).

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Current phase of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Sampling on every tick.
    Running,
    /// No new samples; in-flight messages are being flushed.
    Draining,
    /// Terminal.
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "Running",
            LifecycleState::Draining => "Draining",
            LifecycleState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Shared lifecycle handle. Clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state_tx: watch::Sender<LifecycleState>,
    state_rx: watch::Receiver<LifecycleState>,
    shutdown: CancellationToken,
}

impl Lifecycle {
    /// Creates a lifecycle in the `Running` state.
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(LifecycleState::Running);
        Self {
            state_tx,
            state_rx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    /// Token cancelled when shutdown is requested.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests shutdown. Only flips the cancellation flag and wakes waiters,
    /// so it is safe to call from a signal listener. Idempotent.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Shutdown requested");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await;
    }

    /// Moves to the next state. Only the forward step by exactly one phase is
    /// allowed; repeating the current state is rejected too.
    pub fn advance(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let current = self.current_state();
        let allowed = matches!(
            (current, next),
            (LifecycleState::Running, LifecycleState::Draining)
                | (LifecycleState::Draining, LifecycleState::Stopped)
        );
        if !allowed {
            return Err(LifecycleError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        // Draining always implies a shutdown request.
        if next == LifecycleState::Draining {
            self.shutdown.cancel();
        }
        self.state_tx.send_replace(next);
        debug!("The lifecycle state has changed: {} -> {}", current, next);
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
