//! In-process emulation of the kernel key facility.
//!
//! Reproduces the parts of the kernel's behaviour the actor depends on:
//! session keyrings are attached to the joining thread, a keyring is only
//! reachable from a thread that joined it, the session special id resolves
//! per calling thread, re-adding a `user` key replaces its payload, and
//! `user` payloads must be between 1 and 32767 bytes.
//!
//! The emulated "kernel" is shared by every thread in the process, so its
//! state sits behind a mutex.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use super::{errno, KeyFacility, KeySerial};
use crate::error::FacilityError;
use crate::perm::{Permission, PermissionGroup, PermissionMask};

const FIRST_SERIAL: i32 = 100_000_000;

#[derive(Debug)]
struct Keyring {
    name: String,
    perm: PermissionMask,
    /// Linked keys by (type, description).
    links: BTreeMap<(String, String), KeySerial>,
}

#[derive(Debug)]
struct Key {
    key_type: String,
    description: String,
    payload: Vec<u8>,
    perm: PermissionMask,
    keyring: KeySerial,
}

#[derive(Debug)]
struct State {
    next_serial: i32,
    sessions: HashMap<ThreadId, KeySerial>,
    keyrings: HashMap<KeySerial, Keyring>,
    keys: HashMap<KeySerial, Key>,
    observed: HashSet<ThreadId>,
    fail_join: Option<i32>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_serial: FIRST_SERIAL,
            sessions: HashMap::new(),
            keyrings: HashMap::new(),
            keys: HashMap::new(),
            observed: HashSet::new(),
            fail_join: None,
        }
    }
}

impl State {
    fn allocate(&mut self) -> KeySerial {
        let serial = KeySerial::new(self.next_serial);
        self.next_serial = self.next_serial.saturating_add(1);
        serial
    }

    /// Resolve `id` to a keyring possessed by the calling thread.
    fn possessed_keyring(&self, op: &'static str, id: KeySerial) -> Result<KeySerial, FacilityError> {
        let me = thread::current().id();
        let session = self.sessions.get(&me).copied();
        if id == KeySerial::SESSION_KEYRING {
            return session.ok_or_else(|| FacilityError::from_errno(op, errno::ENOKEY));
        }
        if !self.keyrings.contains_key(&id) {
            return Err(FacilityError::from_errno(op, errno::ENOKEY));
        }
        if session != Some(id) {
            return Err(FacilityError::from_errno(op, errno::EACCES));
        }
        Ok(id)
    }

    /// Resolve a key linked into a keyring possessed by the calling thread.
    fn possessed_key(&self, op: &'static str, id: KeySerial) -> Result<&Key, FacilityError> {
        let key = self
            .keys
            .get(&id)
            .ok_or_else(|| FacilityError::from_errno(op, errno::ENOKEY))?;
        self.possessed_keyring(op, key.keyring)?;
        Ok(key)
    }
}

/// An in-memory stand-in for the kernel key facility.
///
/// Clones share the same emulated kernel state.
#[derive(Debug, Clone, Default)]
pub struct MemoryFacility {
    state: Arc<Mutex<State>>,
}

impl MemoryFacility {
    /// Largest payload the kernel accepts for a `user` key.
    pub const MAX_USER_PAYLOAD: usize = 32_767;

    /// Create an empty facility with no keyrings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `join_session_keyring` fail with `errno`.
    pub fn fail_join(&self, errno: i32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_join = Some(errno);
        }
    }

    /// Threads that have issued at least one call.
    pub fn observed_threads(&self) -> HashSet<ThreadId> {
        self.state
            .lock()
            .map(|state| state.observed.clone())
            .unwrap_or_default()
    }

    /// Number of keys currently linked anywhere.
    pub fn key_count(&self) -> usize {
        self.state.lock().map(|state| state.keys.len()).unwrap_or(0)
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, State>, FacilityError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| FacilityError::internal(op, "facility state poisoned"))?;
        state.observed.insert(thread::current().id());
        Ok(state)
    }
}

fn default_keyring_perm() -> PermissionMask {
    PermissionMask::PROCESS_ALL.with(
        PermissionGroup::User,
        Permission::VIEW | Permission::READ | Permission::SEARCH | Permission::LINK,
    )
}

fn default_key_perm() -> PermissionMask {
    PermissionMask::PROCESS_ALL.with(PermissionGroup::User, Permission::VIEW)
}

impl KeyFacility for MemoryFacility {
    fn join_session_keyring(&self, name: &str) -> Result<KeySerial, FacilityError> {
        const OP: &str = "keyctl_join_session_keyring";
        let mut state = self.lock(OP)?;
        if let Some(code) = state.fail_join {
            return Err(FacilityError::from_errno(OP, code));
        }
        let serial = state.allocate();
        state.keyrings.insert(
            serial,
            Keyring {
                name: name.to_owned(),
                perm: default_keyring_perm(),
                links: BTreeMap::new(),
            },
        );
        state.sessions.insert(thread::current().id(), serial);
        Ok(serial)
    }

    fn add_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError> {
        const OP: &str = "add_key";
        let mut state = self.lock(OP)?;
        if key_type != "user" {
            return Err(FacilityError::from_errno(OP, errno::ENODEV));
        }
        let payload_fits = (1..=Self::MAX_USER_PAYLOAD).contains(&payload.len());
        if description.is_empty() || !payload_fits {
            return Err(FacilityError::from_errno(OP, errno::EINVAL));
        }
        let ring = state.possessed_keyring(OP, keyring)?;
        let link = (key_type.to_owned(), description.to_owned());

        let existing = state
            .keyrings
            .get(&ring)
            .and_then(|r| r.links.get(&link).copied());
        if let Some(serial) = existing {
            if let Some(key) = state.keys.get_mut(&serial) {
                key.payload = payload.to_vec();
                return Ok(serial);
            }
        }

        let serial = state.allocate();
        state.keys.insert(
            serial,
            Key {
                key_type: key_type.to_owned(),
                description: description.to_owned(),
                payload: payload.to_vec(),
                perm: default_key_perm(),
                keyring: ring,
            },
        );
        if let Some(r) = state.keyrings.get_mut(&ring) {
            r.links.insert(link, serial);
        }
        Ok(serial)
    }

    fn request_key(
        &self,
        key_type: &str,
        description: &str,
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError> {
        const OP: &str = "request_key";
        let state = self.lock(OP)?;
        let ring = state.possessed_keyring(OP, keyring)?;
        state
            .keyrings
            .get(&ring)
            .and_then(|r| {
                r.links
                    .get(&(key_type.to_owned(), description.to_owned()))
                    .copied()
            })
            .ok_or_else(|| FacilityError::from_errno(OP, errno::ENOKEY))
    }

    fn read(&self, key: KeySerial, buf: &mut [u8]) -> Result<usize, FacilityError> {
        const OP: &str = "keyctl_read";
        let state = self.lock(OP)?;
        let payload = state.possessed_key(OP, key)?.payload.as_slice();
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok(payload.len())
    }

    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> Result<(), FacilityError> {
        const OP: &str = "keyctl_unlink";
        let mut state = self.lock(OP)?;
        let ring = state.possessed_keyring(OP, keyring)?;
        let linked = state.keys.get(&key).filter(|k| k.keyring == ring).map(|k| {
            (k.key_type.clone(), k.description.clone())
        });
        let Some(link) = linked else {
            return Err(FacilityError::from_errno(OP, errno::ENOENT));
        };
        if let Some(r) = state.keyrings.get_mut(&ring) {
            r.links.remove(&link);
        }
        state.keys.remove(&key);
        Ok(())
    }

    fn describe(&self, id: KeySerial) -> Result<String, FacilityError> {
        const OP: &str = "keyctl_describe";
        let state = self.lock(OP)?;
        if let Ok(ring) = state.possessed_keyring(OP, id) {
            if let Some(r) = state.keyrings.get(&ring) {
                return Ok(format!("keyring;0;0;{};{}", r.perm, r.name));
            }
        }
        let key = state.possessed_key(OP, id)?;
        Ok(format!(
            "{};0;0;{};{}",
            key.key_type, key.perm, key.description
        ))
    }

    fn set_perm(&self, id: KeySerial, mask: PermissionMask) -> Result<(), FacilityError> {
        const OP: &str = "keyctl_setperm";
        let mut state = self.lock(OP)?;
        if let Ok(ring) = state.possessed_keyring(OP, id) {
            if let Some(r) = state.keyrings.get_mut(&ring) {
                r.perm = mask;
                return Ok(());
            }
        }
        state.possessed_key(OP, id)?;
        if let Some(key) = state.keys.get_mut(&id) {
            key.perm = mask;
        }
        Ok(())
    }
}
