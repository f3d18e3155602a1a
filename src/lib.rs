//! keyring-agent: a thread-affine actor around the Linux session keyring.
//!
//! Linux attaches a session keyring to the thread that joined it, so an
//! async service cannot call the keyring from whichever worker thread its
//! task lands on. [`KeyringActor`] owns one pinned OS thread that joins the
//! keyring and serves add, read, remove, describe and permission requests
//! for any number of async callers.
//!
//! The kernel calls sit behind [`facility::KeyFacility`]; the in-process
//! [`facility::MemoryFacility`] emulates them for tests.

#![warn(missing_docs)]

pub mod actor;
pub mod config;
pub mod error;
pub mod facility;
pub mod handle;
pub mod logging;
pub mod perm;

pub use actor::{ActorStatus, KeyringActor, Secret, StopCause};
pub use error::{FacilityError, KeyringError, Result};
pub use handle::{KeyDescription, KeyringHandle};
pub use perm::{Permission, PermissionGroup, PermissionMask};
