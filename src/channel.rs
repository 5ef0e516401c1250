use std::fmt;

/// Key material as it is handed to a channel.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum KeyMaterial<'a> {
    /// Let the kernel use the key held in its sed-opal keyring.
    Keyring,
    /// Key bytes carried in the request.
    Included(&'a [u8]),
}

impl fmt::Debug for KeyMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Keyring => f.write_str("Keyring"),
            KeyMaterial::Included(k) => write!(f, "Included(<{} bytes>)", k.len()),
        }
    }
}

/// Requested state of a locking range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockState {
    ReadWrite,
    /// Writes locked, reads allowed.
    ReadOnly,
    Locked,
}

impl LockState {
    /// `read_only` wins over `lock`: both `lock -r` and `unlock -r` ask for
    /// a write-locked range.
    pub fn for_request(lock: bool, read_only: bool) -> Self {
        if read_only {
            LockState::ReadOnly
        } else if lock {
            LockState::Locked
        } else {
            LockState::ReadWrite
        }
    }
}

/// One security command. All authenticated commands act as the Admin1
/// authority of the Locking SP, except the two reverts which address the
/// TPer owner (SID) and the PSID authority.
#[derive(Copy, Clone, Debug)]
pub enum Request<'a> {
    /// Level 0 discovery.
    Discovery,
    TakeOwnership {
        key: KeyMaterial<'a>,
    },
    ActivateLockingSp {
        key: KeyMaterial<'a>,
        ranges: &'a [u8],
    },
    SetupRange {
        key: KeyMaterial<'a>,
        range: u8,
        read_lock_enabled: bool,
        write_lock_enabled: bool,
    },
    LockUnlock {
        key: KeyMaterial<'a>,
        range: u8,
        state: LockState,
    },
    SetPassword {
        current: KeyMaterial<'a>,
        new: KeyMaterial<'a>,
    },
    RevertTper {
        key: KeyMaterial<'a>,
    },
    PsidRevert {
        psid: KeyMaterial<'a>,
    },
}

impl Request<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Discovery => "discovery",
            Request::TakeOwnership { .. } => "take-ownership",
            Request::ActivateLockingSp { .. } => "activate-lsp",
            Request::SetupRange { .. } => "lr-setup",
            Request::LockUnlock { .. } => "lock-unlock",
            Request::SetPassword { .. } => "set-pw",
            Request::RevertTper { .. } => "revert-tper",
            Request::PsidRevert { .. } => "psid-revert-tper",
        }
    }
}

/// Raw outcome of an exchange: `0` on success, a positive TCG method status,
/// or a negated `errno`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Response {
    pub status: i32,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(payload: Vec<u8>) -> Self {
        Response { status: 0, payload }
    }

    pub fn status(status: i32) -> Self {
        Response {
            status,
            payload: Vec::new(),
        }
    }
}

/// Request/response transport to one device.
pub trait SecurityChannel {
    fn exchange(&mut self, request: &Request<'_>) -> Response;
}
