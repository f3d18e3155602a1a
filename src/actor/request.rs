//! Messages accepted by the actor loop.
//!
//! Each variant carries its own typed reply sender, so a reply can only be
//! delivered as the result type of the request that asked for it.

use tokio::sync::oneshot;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::handle::KeyDescription;
use crate::perm::PermissionMask;

/// Payload bytes that are wiped when dropped.
pub type Secret = Zeroizing<Vec<u8>>;

/// A single request for the actor, consumed exactly once.
pub(crate) enum Request {
    Add {
        name: String,
        payload: Secret,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        name: String,
        reply: oneshot::Sender<Result<Secret>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Describe {
        reply: oneshot::Sender<Result<KeyDescription>>,
    },
    SetPermission {
        mask: PermissionMask,
        reply: oneshot::Sender<Result<()>>,
    },
}

// Manual Debug so payloads never reach a log line.
impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add { name, payload, .. } => f
                .debug_struct("Add")
                .field("name", name)
                .field("payload_len", &payload.len())
                .finish(),
            Self::Read { name, .. } => f.debug_struct("Read").field("name", name).finish(),
            Self::Remove { name, .. } => f.debug_struct("Remove").field("name", name).finish(),
            Self::Describe { .. } => f.write_str("Describe"),
            Self::SetPermission { mask, .. } => f
                .debug_struct("SetPermission")
                .field("mask", &format_args!("{mask}"))
                .finish(),
        }
    }
}

impl Request {
    /// Short operation name for logging.
    pub(crate) fn op(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Read { .. } => "read",
            Self::Remove { .. } => "remove",
            Self::Describe { .. } => "describe",
            Self::SetPermission { .. } => "set_permission",
        }
    }

    /// Answer the request with an error without touching the keyring.
    pub(crate) fn reject(self, error: crate::error::KeyringError) {
        // A dropped receiver means the caller gave up; nothing to deliver.
        let _ = match self {
            Self::Add { reply, .. }
            | Self::Remove { reply, .. }
            | Self::SetPermission { reply, .. } => reply.send(Err(error)).map_err(drop),
            Self::Read { reply, .. } => reply.send(Err(error)).map_err(drop),
            Self::Describe { reply } => reply.send(Err(error)).map_err(drop),
        };
    }
}
