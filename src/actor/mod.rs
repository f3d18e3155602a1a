//! Thread-affine keyring actor.
//!
//! The kernel ties a session keyring to the thread that joined it, while
//! tokio moves tasks freely between worker threads. The actor resolves this
//! by owning one dedicated OS thread for its whole life: the thread joins
//! the keyring, builds a current-thread runtime on itself and serves every
//! request from a single loop. Callers only ever hold a [`KeyringActor`],
//! which forwards requests through a mailbox and awaits a one-shot reply.
//!
//! ```text
//! caller ──Request──▶ mailbox ──▶ loop (pinned thread) ──▶ KeyringHandle ──▶ kernel
//!    ▲                                   │
//!    └────────────── oneshot reply ◀─────┘
//! ```

mod lifecycle;
mod request;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::KeyringConfig;
use crate::error::{FacilityError, KeyringError, Result};
use crate::facility::KeyFacility;
use crate::handle::{KeyDescription, KeyringHandle};
use crate::perm::PermissionMask;

pub use lifecycle::{ActorStatus, StopCause};
pub use request::Secret;

use lifecycle::{Shutdown, StatusGuard};
use request::Request;

/// Caller-side handle to a running keyring actor.
///
/// Cheap to clone; every clone talks to the same actor thread. When the
/// last clone is dropped without [`stop`](Self::stop) the actor exits on
/// its own and releases its thread.
#[derive(Clone)]
pub struct KeyringActor {
    mailbox: mpsc::Sender<Request>,
    shutdown: Arc<Shutdown>,
    status: watch::Receiver<ActorStatus>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
    thread_id: ThreadId,
}

impl std::fmt::Debug for KeyringActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringActor")
            .field("thread_id", &self.thread_id)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl KeyringActor {
    /// Spawn the actor thread without waiting for the keyring to be joined.
    ///
    /// Requests sent before the join completes are queued. If the join
    /// fails they, and every later request, fail with the creation error.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::CreationFailed`] if the OS thread cannot be
    /// spawned.
    pub fn spawn<F: KeyFacility>(facility: F, config: &KeyringConfig) -> Result<Self> {
        let (mailbox, inbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (shutdown, shutdown_rx) = Shutdown::new();
        let (status_tx, status) = watch::channel(ActorStatus::Created);

        let settings = config.clone();
        // std panics on interior NULs in thread names.
        let thread_name = config.thread_name.replace('\0', "");
        let join = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                run_pinned(facility, &settings, inbox, shutdown_rx, StatusGuard::new(status_tx));
            })
            .map_err(|e| {
                KeyringError::CreationFailed(FacilityError::from_io("spawn actor thread", &e))
            })?;
        let thread_id = join.thread().id();

        info!(
            keyring = %config.name,
            thread = %thread_name,
            "keyring actor spawned"
        );

        Ok(Self {
            mailbox,
            shutdown: Arc::new(shutdown),
            status,
            thread: Arc::new(Mutex::new(Some(join))),
            thread_id,
        })
    }

    /// Spawn the actor and wait until it is serving requests.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::CreationFailed`] if the thread cannot be
    /// spawned or the session keyring cannot be joined.
    pub async fn start<F: KeyFacility>(facility: F, config: &KeyringConfig) -> Result<Self> {
        let actor = Self::spawn(facility, config)?;
        actor.ready().await?;
        Ok(actor)
    }

    /// Start an actor on the kernel's session keyring facility.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    #[cfg(target_os = "linux")]
    pub async fn start_session(config: &KeyringConfig) -> Result<Self> {
        Self::start(crate::facility::LinuxFacility::new(), config).await
    }

    /// Wait until the actor leaves `Created`.
    ///
    /// # Errors
    ///
    /// Returns the creation error if the keyring could not be joined, or
    /// [`KeyringError::Shutdown`] if the actor stopped for another reason.
    pub async fn ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|s| *s != ActorStatus::Created)
            .await
            .map(|s| (*s).clone())
            .unwrap_or(ActorStatus::Stopped(StopCause::Detached));
        match current {
            ActorStatus::Running => Ok(()),
            ActorStatus::Stopped(StopCause::CreationFailed(e)) => Err(e),
            ActorStatus::Created | ActorStatus::Stopping | ActorStatus::Stopped(_) => {
                Err(KeyringError::Shutdown)
            }
        }
    }

    /// Store `payload` under `name`.
    ///
    /// # Errors
    ///
    /// Returns the keyring error for this request, or
    /// [`KeyringError::Shutdown`] once the actor is stopping.
    pub async fn add_key(&self, name: &str, payload: &[u8]) -> Result<()> {
        self.call(|reply| Request::Add {
            name: name.to_owned(),
            payload: Zeroizing::new(payload.to_vec()),
            reply,
        })
        .await
    }

    /// Read the payload stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NotFound`] when `name` has no key, or
    /// [`KeyringError::Shutdown`] once the actor is stopping.
    pub async fn read_key(&self, name: &str) -> Result<Secret> {
        self.call(|reply| Request::Read {
            name: name.to_owned(),
            reply,
        })
        .await
    }

    /// Remove the key stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NotFound`] when `name` has no key, or
    /// [`KeyringError::Shutdown`] once the actor is stopping.
    pub async fn remove_key(&self, name: &str) -> Result<()> {
        self.call(|reply| Request::Remove {
            name: name.to_owned(),
            reply,
        })
        .await
    }

    /// Describe the actor's keyring.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Facility`] if the description cannot be read
    /// or parsed.
    pub async fn describe(&self) -> Result<KeyDescription> {
        self.call(|reply| Request::Describe { reply }).await
    }

    /// Replace the permission mask of the actor's keyring.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Facility`] if the kernel refuses the mask.
    pub async fn set_permission(&self, mask: PermissionMask) -> Result<()> {
        self.call(|reply| Request::SetPermission { mask, reply })
            .await
    }

    /// Ask the actor to stop. Safe to call any number of times.
    ///
    /// The loop notices the request before picking up its next message;
    /// a keyring call already in progress is never interrupted.
    pub fn stop(&self) {
        if self.shutdown.trigger() {
            info!(thread = ?self.thread_id, "keyring actor stop requested");
        }
    }

    /// Wait for the actor to stop and its thread to exit.
    ///
    /// Every concurrent waiter returns only after the keyring handle has
    /// been released; one of them also joins the thread.
    pub async fn wait(&self) -> StopCause {
        let mut status = self.status.clone();
        let cause = status
            .wait_for(ActorStatus::is_stopped)
            .await
            .ok()
            .and_then(|s| match &*s {
                ActorStatus::Stopped(cause) => Some(cause.clone()),
                _ => None,
            })
            .unwrap_or(StopCause::Detached);

        let join = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            match tokio::task::spawn_blocking(move || join.join()).await {
                Ok(Ok(())) => debug!(thread = ?self.thread_id, "keyring actor thread joined"),
                Ok(Err(_)) => warn!(thread = ?self.thread_id, "keyring actor thread panicked"),
                Err(e) => warn!(error = %e, "failed to join keyring actor thread"),
            }
        }
        cause
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ActorStatus {
        self.status.borrow().clone()
    }

    /// Identity of the thread that owns the keyring.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Request) -> Result<T> {
        if self.shutdown.is_triggered() {
            return Err(self.closed_error());
        }
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(build(reply))
            .await
            .map_err(|_| self.closed_error())?;
        response.await.map_err(|_| self.closed_error())?
    }

    fn closed_error(&self) -> KeyringError {
        match &*self.status.borrow() {
            ActorStatus::Stopped(StopCause::CreationFailed(e)) => e.clone(),
            _ => KeyringError::Shutdown,
        }
    }
}

/// Body of the actor thread. Everything below runs on that one thread.
fn run_pinned<F: KeyFacility>(
    facility: F,
    config: &KeyringConfig,
    mut inbox: mpsc::Receiver<Request>,
    shutdown: watch::Receiver<bool>,
    status: StatusGuard,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let error =
                KeyringError::CreationFailed(FacilityError::from_io("build actor runtime", &e));
            return abort_creation(error, &status, inbox);
        }
    };

    let handle = match open_keyring(facility, config) {
        Ok(handle) => handle,
        Err(error) => {
            drop(runtime);
            return abort_creation(error, &status, inbox);
        }
    };

    status.set(ActorStatus::Running);
    info!(keyring = %handle.serial(), name = %config.name, "keyring actor running");

    let cause = runtime.block_on(serve(&handle, &mut inbox, shutdown));

    status.set(ActorStatus::Stopping);
    inbox.close();
    let mut rejected: usize = 0;
    while let Ok(request) = inbox.try_recv() {
        request.reject(KeyringError::Shutdown);
        rejected = rejected.saturating_add(1);
    }
    info!(cause = ?cause, rejected, "keyring actor stopping");

    // Waiters return once `Stopped` is published, so the keyring must be
    // released first.
    drop(handle);
    drop(runtime);
    status.finish(cause);
}

fn open_keyring<F: KeyFacility>(facility: F, config: &KeyringConfig) -> Result<KeyringHandle<F>> {
    let handle = KeyringHandle::create(facility, &config.name, &config.key_type)?;
    if let Some(mask) = config.permission {
        handle.set_permission(mask).map_err(|e| match e {
            KeyringError::Facility(inner) => KeyringError::CreationFailed(inner),
            other => other,
        })?;
    }
    Ok(handle)
}

/// Record a creation failure and fail everything already queued with it.
fn abort_creation(error: KeyringError, status: &StatusGuard, mut inbox: mpsc::Receiver<Request>) {
    warn!(error = %error, "keyring actor failed to start");
    status.finish(StopCause::CreationFailed(error.clone()));
    inbox.close();
    while let Ok(request) = inbox.try_recv() {
        request.reject(error.clone());
    }
}

async fn serve<F: KeyFacility>(
    handle: &KeyringHandle<F>,
    inbox: &mut mpsc::Receiver<Request>,
    mut shutdown: watch::Receiver<bool>,
) -> StopCause {
    loop {
        tokio::select! {
            biased;

            stopped = shutdown.wait_for(|stop| *stop) => {
                return match stopped {
                    Ok(_) => StopCause::Cancelled,
                    Err(_) => StopCause::Detached,
                };
            }
            request = inbox.recv() => match request {
                Some(request) => dispatch(handle, request),
                None => return StopCause::Detached,
            },
        }
    }
}

fn dispatch<F: KeyFacility>(handle: &KeyringHandle<F>, request: Request) {
    let op = request.op();
    debug!(request = ?request, "serving keyring request");

    let delivered = match request {
        Request::Add {
            name,
            payload,
            reply,
        } => reply
            .send(guarded(op, || handle.add(&name, &payload)))
            .is_ok(),
        Request::Read { name, reply } => reply.send(guarded(op, || handle.read(&name))).is_ok(),
        Request::Remove { name, reply } => {
            reply.send(guarded(op, || handle.remove(&name))).is_ok()
        }
        Request::Describe { reply } => reply.send(guarded(op, || handle.describe())).is_ok(),
        Request::SetPermission { mask, reply } => reply
            .send(guarded(op, || handle.set_permission(mask)))
            .is_ok(),
    };

    if !delivered {
        debug!(op, "caller went away before the reply");
    }
}

/// Run one keyring call, turning a panic into a facility error so the loop
/// survives and the caller still gets exactly one reply.
fn guarded<T>(op: &'static str, call: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(cause) => {
            let message = panic_message(cause.as_ref());
            warn!(op, panic = %message, "keyring call panicked");
            Err(FacilityError::internal(op, format!("panicked: {message}")).into())
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    cause
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown panic".to_owned())
}
