//! Actor lifecycle: status publication and the cancellation flag.

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::KeyringError;

/// Observable state of a keyring actor.
///
/// `Created -> Running -> Stopping -> Stopped`, or `Created -> Stopped`
/// when the keyring cannot be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorStatus {
    /// The thread is starting and has not joined the keyring yet.
    Created,
    /// The keyring is joined and requests are being served.
    Running,
    /// Cancellation was observed; pending requests are being rejected.
    Stopping,
    /// The loop has exited and the thread is released.
    Stopped(StopCause),
}

impl ActorStatus {
    /// Whether the actor has fully stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

/// Why an actor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// `stop()` was called.
    Cancelled,
    /// Every caller handle was dropped without calling `stop()`.
    Detached,
    /// The keyring could not be created; the actor never ran.
    CreationFailed(KeyringError),
    /// The actor thread unwound outside a guarded keyring call.
    Panicked(String),
}

/// Publishes status from the actor thread and guarantees that `Stopped` is
/// published however the thread exits.
pub(crate) struct StatusGuard {
    tx: watch::Sender<ActorStatus>,
}

impl StatusGuard {
    pub(crate) fn new(tx: watch::Sender<ActorStatus>) -> Self {
        Self { tx }
    }

    pub(crate) fn set(&self, status: ActorStatus) {
        self.tx.send_replace(status);
    }

    /// Publish `Stopped` unless it was already published.
    pub(crate) fn finish(&self, cause: StopCause) {
        self.tx.send_if_modified(|status| {
            if status.is_stopped() {
                return false;
            }
            *status = ActorStatus::Stopped(cause);
            true
        });
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("keyring actor thread panicked");
            self.finish(StopCause::Panicked("actor thread panicked".to_owned()));
        } else {
            self.finish(StopCause::Detached);
        }
        let status = self.tx.borrow().clone();
        info!(status = ?status, "keyring actor released its thread");
    }
}

/// Idempotent cancellation flag shared by every caller handle.
#[derive(Debug)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub(crate) fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}
