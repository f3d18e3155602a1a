//! The kernel key management facility, seen through one trait.
//!
//! [`KeyFacility`] mirrors the `add_key(2)`, `request_key(2)` and
//! `keyctl(2)` calls the keyring handle needs. [`LinuxFacility`] issues the
//! real syscalls; [`MemoryFacility`] emulates their thread-scoped session
//! semantics in process so the actor can be exercised anywhere.
//!
//! Session keyrings are attached to the calling thread, so every method
//! must be invoked from the thread that joined the keyring it addresses.

#[cfg(target_os = "linux")]
mod linux;
mod memory;

use std::fmt;

use serde::Serialize;

use crate::error::FacilityError;
use crate::perm::PermissionMask;

#[cfg(target_os = "linux")]
pub use linux::LinuxFacility;
pub use memory::MemoryFacility;

/// Linux errno values the keyring core inspects or produces.
pub mod errno {
    /// No such file or directory (key not linked to the keyring).
    pub const ENOENT: i32 = 2;
    /// Permission denied.
    pub const EACCES: i32 = 13;
    /// No such device (unknown key type).
    pub const ENODEV: i32 = 19;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Message too long (payload grew while being read).
    pub const EMSGSIZE: i32 = 90;
    /// Required key not available.
    pub const ENOKEY: i32 = 126;
}

/// Kernel-assigned serial number of a key or keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct KeySerial(i32);

impl KeySerial {
    /// Special id resolving to the calling thread's session keyring.
    pub const SESSION_KEYRING: Self = Self(-3);

    /// Wrap a raw serial.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw serial value.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for KeySerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calls into the kernel key management facility.
///
/// Implementations must be movable onto the actor thread; the returned
/// serials are only meaningful on the thread that made the call.
pub trait KeyFacility: Send + 'static {
    /// Join (creating if needed) the named session keyring for the calling
    /// thread and return its serial.
    fn join_session_keyring(&self, name: &str) -> Result<KeySerial, FacilityError>;

    /// Add a key, or update the payload of an existing key with the same
    /// type and description, linking it into `keyring`.
    fn add_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError>;

    /// Resolve a key by type and description without any upcall.
    fn request_key(
        &self,
        key_type: &str,
        description: &str,
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError>;

    /// Copy up to `buf.len()` payload bytes into `buf` and return the full
    /// payload length. An empty buffer queries the length only.
    fn read(&self, key: KeySerial, buf: &mut [u8]) -> Result<usize, FacilityError>;

    /// Remove the link from `keyring` to `key`.
    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> Result<(), FacilityError>;

    /// Describe a key or keyring as `type;uid;gid;perm;description`.
    fn describe(&self, id: KeySerial) -> Result<String, FacilityError>;

    /// Replace the permission mask of a key or keyring.
    fn set_perm(&self, id: KeySerial, mask: PermissionMask) -> Result<(), FacilityError>;
}
