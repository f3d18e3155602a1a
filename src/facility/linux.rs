//! Raw keyring syscalls.
//!
//! glibc has no wrappers for the key management calls, so they are issued
//! through `syscall(2)` directly. Every argument is widened to `c_long`
//! before being passed through the variadic interface.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::ptr;

use libc::{c_char, c_long};

use super::{errno, KeyFacility, KeySerial};
use crate::error::FacilityError;
use crate::perm::PermissionMask;

const KEYCTL_JOIN_SESSION_KEYRING: c_long = 1;
const KEYCTL_SETPERM: c_long = 5;
const KEYCTL_DESCRIBE: c_long = 6;
const KEYCTL_UNLINK: c_long = 9;
const KEYCTL_READ: c_long = 11;

/// The kernel key management facility of the running Linux system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxFacility;

impl LinuxFacility {
    /// Create a facility backed by the real syscalls.
    pub fn new() -> Self {
        Self
    }
}

fn c_string(op: &'static str, value: &str) -> Result<CString, FacilityError> {
    CString::new(value).map_err(|_| FacilityError::from_errno(op, errno::EINVAL))
}

fn serial_result(op: &'static str, ret: c_long) -> Result<KeySerial, FacilityError> {
    if ret < 0 {
        return Err(FacilityError::last_os_error(op));
    }
    i32::try_from(ret)
        .map(KeySerial::new)
        .map_err(|_| FacilityError::malformed(op, format!("serial {ret} out of range")))
}

fn length_result(op: &'static str, ret: c_long) -> Result<usize, FacilityError> {
    if ret < 0 {
        return Err(FacilityError::last_os_error(op));
    }
    usize::try_from(ret)
        .map_err(|_| FacilityError::malformed(op, format!("length {ret} out of range")))
}

fn status_result(op: &'static str, ret: c_long) -> Result<(), FacilityError> {
    if ret < 0 {
        return Err(FacilityError::last_os_error(op));
    }
    Ok(())
}

fn len_arg(op: &'static str, len: usize) -> Result<c_long, FacilityError> {
    c_long::try_from(len).map_err(|_| FacilityError::from_errno(op, errno::EINVAL))
}

/// `keyctl(KEYCTL_READ | KEYCTL_DESCRIBE, id, buf, len)`.
fn keyctl_buffer(
    op: &'static str,
    cmd: c_long,
    id: KeySerial,
    buf: &mut [u8],
) -> Result<usize, FacilityError> {
    let len = len_arg(op, buf.len())?;
    let ptr = if buf.is_empty() {
        ptr::null_mut()
    } else {
        buf.as_mut_ptr()
    };
    // SAFETY: `ptr` is null with length 0, or points to `len` writable bytes
    // owned by `buf` for the duration of the call.
    let ret = unsafe { libc::syscall(libc::SYS_keyctl, cmd, c_long::from(id.get()), ptr, len) };
    length_result(op, ret)
}

impl KeyFacility for LinuxFacility {
    fn join_session_keyring(&self, name: &str) -> Result<KeySerial, FacilityError> {
        const OP: &str = "keyctl_join_session_keyring";
        let name = c_string(OP, name)?;
        // SAFETY: `name` is a valid NUL-terminated string that outlives the call.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_JOIN_SESSION_KEYRING,
                name.as_ptr(),
            )
        };
        serial_result(OP, ret)
    }

    fn add_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError> {
        const OP: &str = "add_key";
        let key_type = c_string(OP, key_type)?;
        let description = c_string(OP, description)?;
        let len = len_arg(OP, payload.len())?;
        // SAFETY: both strings are NUL-terminated and `payload` is readable
        // for `len` bytes; the kernel copies everything before returning.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_add_key,
                key_type.as_ptr(),
                description.as_ptr(),
                payload.as_ptr(),
                len,
                c_long::from(keyring.get()),
            )
        };
        serial_result(OP, ret)
    }

    fn request_key(
        &self,
        key_type: &str,
        description: &str,
        keyring: KeySerial,
    ) -> Result<KeySerial, FacilityError> {
        const OP: &str = "request_key";
        let key_type = c_string(OP, key_type)?;
        let description = c_string(OP, description)?;
        let callout: *const c_char = ptr::null();
        // SAFETY: both strings are NUL-terminated; a null callout disables
        // the /sbin/request-key upcall.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_request_key,
                key_type.as_ptr(),
                description.as_ptr(),
                callout,
                c_long::from(keyring.get()),
            )
        };
        serial_result(OP, ret)
    }

    fn read(&self, key: KeySerial, buf: &mut [u8]) -> Result<usize, FacilityError> {
        keyctl_buffer("keyctl_read", KEYCTL_READ, key, buf)
    }

    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> Result<(), FacilityError> {
        // SAFETY: integer-only arguments.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_UNLINK,
                c_long::from(key.get()),
                c_long::from(keyring.get()),
            )
        };
        status_result("keyctl_unlink", ret)
    }

    fn describe(&self, id: KeySerial) -> Result<String, FacilityError> {
        const OP: &str = "keyctl_describe";
        let mut size = keyctl_buffer(OP, KEYCTL_DESCRIBE, id, &mut [])?;
        // The description can change between the two calls; re-query once.
        for _ in 0..2 {
            let mut buf = vec![0u8; size];
            let needed = keyctl_buffer(OP, KEYCTL_DESCRIBE, id, &mut buf)?;
            if needed <= buf.len() {
                buf.truncate(needed);
                if buf.last() == Some(&0) {
                    buf.pop();
                }
                return String::from_utf8(buf)
                    .map_err(|_| FacilityError::malformed(OP, "description is not UTF-8"));
            }
            size = needed;
        }
        Err(FacilityError::from_errno(OP, errno::EMSGSIZE))
    }

    fn set_perm(&self, id: KeySerial, mask: PermissionMask) -> Result<(), FacilityError> {
        const OP: &str = "keyctl_setperm";
        let bits = c_long::try_from(mask.bits())
            .map_err(|_| FacilityError::from_errno(OP, errno::EINVAL))?;
        // SAFETY: integer-only arguments.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_SETPERM,
                c_long::from(id.get()),
                bits,
            )
        };
        status_result(OP, ret)
    }
}
