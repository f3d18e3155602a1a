//! Key and keyring permission masks.
//!
//! The kernel packs four permission groups into one `u32`, each group
//! holding six significant bits inside its own byte:
//!
//! ```text
//!  31      24 23      16 15       8 7        0
//! +----------+----------+----------+----------+
//! | process  |   user   |  group   |  other   |
//! +----------+----------+----------+----------+
//! ```

use std::fmt;
use std::ops::BitOr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Mask of the six significant bits within one group byte.
const GROUP_BITS: u32 = 0x3f;

bitflags! {
    /// Rights within a single permission group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u32 {
        /// View the key's attributes.
        const VIEW    = 0x01;
        /// Read the payload, or list a keyring.
        const READ    = 0x02;
        /// Update the payload, or add/remove links in a keyring.
        const WRITE   = 0x04;
        /// Find the key by searching a keyring.
        const SEARCH  = 0x08;
        /// Link the key into a keyring.
        const LINK    = 0x10;
        /// Change ownership, permissions or timeout.
        const SETATTR = 0x20;
        /// All six rights.
        const ALL     = GROUP_BITS;
    }
}

/// One of the four permission groups of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionGroup {
    /// Threads possessing the key (the kernel's "possessor").
    Process,
    /// The key's owning user.
    User,
    /// The key's owning group.
    Group,
    /// Everyone else.
    Other,
}

impl PermissionGroup {
    /// All groups, most significant first.
    pub const ALL: [PermissionGroup; 4] = [Self::Process, Self::User, Self::Group, Self::Other];

    /// Bit position of the group's byte within the mask.
    pub fn offset(self) -> u32 {
        match self {
            Self::Process => 24,
            Self::User => 16,
            Self::Group => 8,
            Self::Other => 0,
        }
    }
}

/// A complete 32-bit permission mask as accepted by `KEYCTL_SETPERM`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMask(u32);

impl PermissionMask {
    /// Every right for the possessing process.
    pub const PROCESS_ALL: Self = Self(GROUP_BITS << 24);
    /// Every right for the owning user.
    pub const USER_ALL: Self = Self(GROUP_BITS << 16);
    /// Every right for the owning group.
    pub const GROUP_ALL: Self = Self(GROUP_BITS << 8);
    /// Every right for everyone else.
    pub const OTHER_ALL: Self = Self(GROUP_BITS);

    /// A mask granting nothing.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap raw mask bits as read from the kernel.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw mask bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Replace the rights of one group, leaving the others untouched.
    #[must_use]
    pub fn with(self, group: PermissionGroup, perms: Permission) -> Self {
        let offset = group.offset();
        let cleared = self.0 & !GROUP_BITS.wrapping_shl(offset);
        Self(cleared | perms.bits().wrapping_shl(offset))
    }

    /// Decode the rights of one group.
    pub fn group(self, group: PermissionGroup) -> Permission {
        Permission::from_bits_truncate(self.0.wrapping_shr(group.offset()) & GROUP_BITS)
    }
}

impl BitOr for PermissionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for PermissionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
