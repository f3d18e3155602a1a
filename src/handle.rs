//! Keyring handle: one joined session keyring and the operations on it.
//!
//! A [`KeyringHandle`] is only meaningful on the thread that created it,
//! because the kernel attaches the session keyring to that thread. The
//! handle is therefore `!Send`; the actor creates it on its own thread and
//! never lets it out.

use std::marker::PhantomData;

use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{FacilityError, KeyringError, Result};
use crate::facility::{errno, KeyFacility, KeySerial};
use crate::perm::PermissionMask;

/// Size queries allowed for one read before giving up on a growing payload.
const READ_SIZE_QUERIES: usize = 2;

/// Handle to a session keyring joined by the current thread.
pub struct KeyringHandle<F: KeyFacility> {
    facility: F,
    keyring: KeySerial,
    key_type: String,
    /// Pins the handle to the thread that joined the keyring.
    _not_send: PhantomData<*const ()>,
}

impl<F: KeyFacility> std::fmt::Debug for KeyringHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringHandle")
            .field("keyring", &self.keyring)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

impl<F: KeyFacility> KeyringHandle<F> {
    /// Join (or create) the named session keyring for the calling thread.
    ///
    /// The calling thread becomes the only thread on which the handle is
    /// valid. Keys are stored with type `key_type` (normally `"user"`).
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::CreationFailed`] if the kernel refuses the join.
    pub fn create(facility: F, name: &str, key_type: &str) -> Result<Self> {
        let keyring = facility
            .join_session_keyring(name)
            .map_err(KeyringError::CreationFailed)?;
        debug!(keyring = %keyring, name, "joined session keyring");
        Ok(Self {
            facility,
            keyring,
            key_type: key_type.to_owned(),
            _not_send: PhantomData,
        })
    }

    /// Serial of the joined keyring.
    pub fn serial(&self) -> KeySerial {
        self.keyring
    }

    /// Store `payload` under `name`.
    ///
    /// Re-adding an existing name follows the kernel's behaviour for the key
    /// type; for `user` keys the payload is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Facility`] when the kernel rejects the key.
    pub fn add(&self, name: &str, payload: &[u8]) -> Result<()> {
        let key = self
            .facility
            .add_key(&self.key_type, name, payload, self.keyring)?;
        debug!(keyring = %self.keyring, key = %key, name, "key added");
        Ok(())
    }

    /// Read the payload stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NotFound`] if `name` does not resolve, or
    /// [`KeyringError::Facility`] if the payload keeps growing between the
    /// size query and the fetch.
    pub fn read(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.resolve(name)?;
        self.read_payload(key)
    }

    /// Unlink the key stored under `name` from the keyring.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NotFound`] if `name` does not resolve.
    pub fn remove(&self, name: &str) -> Result<()> {
        let key = self.resolve(name)?;
        self.facility.unlink(key, self.keyring)?;
        debug!(keyring = %self.keyring, key = %key, name, "key removed");
        Ok(())
    }

    /// Describe the keyring itself.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Facility`] if the kernel call fails or the
    /// returned description is malformed.
    pub fn describe(&self) -> Result<KeyDescription> {
        let raw = self.facility.describe(self.keyring)?;
        Ok(KeyDescription::parse(&raw)?)
    }

    /// Replace the keyring's permission mask.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Facility`] if the kernel refuses the change.
    pub fn set_permission(&self, mask: PermissionMask) -> Result<()> {
        self.facility.set_perm(self.keyring, mask)?;
        debug!(keyring = %self.keyring, perm = %mask, "keyring permission set");
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<KeySerial> {
        match self
            .facility
            .request_key(&self.key_type, name, self.keyring)
        {
            Ok(key) => Ok(key),
            Err(e) if e.errno() == Some(errno::ENOKEY) => {
                Err(KeyringError::NotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_payload(&self, key: KeySerial) -> Result<Zeroizing<Vec<u8>>> {
        for _ in 0..READ_SIZE_QUERIES {
            let size = self.facility.read(key, &mut [])?;
            let mut buf = Zeroizing::new(vec![0u8; size]);
            let len = self.facility.read(key, buf.as_mut_slice())?;
            if len <= size {
                buf.truncate(len);
                return Ok(buf);
            }
            debug!(key = %key, size, len, "payload grew during read, re-querying size");
        }
        Err(FacilityError::from_errno("keyctl_read", errno::EMSGSIZE).into())
    }
}

/// Parsed form of a `type;uid;gid;perm;description` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyDescription {
    /// Key type, e.g. `user` or `keyring`.
    pub key_type: String,
    /// Owning user id.
    pub uid: Option<u32>,
    /// Owning group id.
    pub gid: Option<u32>,
    /// Permission mask.
    pub perm: Option<PermissionMask>,
    /// Free-form description, always the last field.
    pub description: String,
    /// Fields the kernel appended after `perm` that this parser does not know.
    pub extra: Vec<String>,
}

impl KeyDescription {
    /// Parse a description as returned by `KEYCTL_DESCRIBE`.
    ///
    /// The description is always the last field and the known fields lead
    /// in order, so newer kernels that insert fields do not break parsing.
    ///
    /// # Errors
    ///
    /// Returns a malformed [`FacilityError`] for an empty string or a
    /// numeric field that does not parse.
    pub fn parse(raw: &str) -> std::result::Result<Self, FacilityError> {
        const OP: &str = "keyctl_describe";
        if raw.is_empty() {
            return Err(FacilityError::malformed(OP, "no data"));
        }

        let mut fields: Vec<&str> = raw.split(';').collect();
        let description = fields.pop().unwrap_or_default().to_owned();
        let mut leading = fields.into_iter();

        let key_type = leading.next().unwrap_or_default().to_owned();
        let uid = leading
            .next()
            .map(|f| parse_id(OP, "uid", f))
            .transpose()?;
        let gid = leading
            .next()
            .map(|f| parse_id(OP, "gid", f))
            .transpose()?;
        let perm = leading
            .next()
            .map(|f| {
                u32::from_str_radix(f, 16)
                    .map(PermissionMask::from_bits)
                    .map_err(|_| FacilityError::malformed(OP, format!("perm field {f:?}")))
            })
            .transpose()?;
        let extra = leading.map(str::to_owned).collect();

        Ok(Self {
            key_type,
            uid,
            gid,
            perm,
            description,
            extra,
        })
    }
}

fn parse_id(op: &'static str, field: &str, value: &str) -> std::result::Result<u32, FacilityError> {
    value
        .parse::<u32>()
        .map_err(|_| FacilityError::malformed(op, format!("{field} field {value:?}")))
}
