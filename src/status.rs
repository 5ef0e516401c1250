//! Status classification.
//!
//! Everything the Security Channel returns is a raw `i32`: zero for success,
//! a positive TCG method status, or a negated `errno` from the kernel. This
//! module is the only place those numbers are interpreted. It turns them into
//! [`SedError`] values and decides how loudly each verb reports them.

use std::borrow::Cow;
use std::fmt;

use nix::errno::Errno;
use tracing::debug;

use crate::channel::Response;
use crate::error::{ErrorKind, Fault, Result, SedError};
use crate::request::Verb;

pub const SED_STATUS_SUCCESS: i32 = 0x00;
pub const SED_STATUS_NOT_AUTHORIZED: i32 = 0x01;
pub const SED_STATUS_OBSOLETE_1: i32 = 0x02;
pub const SED_STATUS_SP_BUSY: i32 = 0x03;
pub const SED_STATUS_SP_FAILED: i32 = 0x04;
pub const SED_STATUS_SP_DISABLED: i32 = 0x05;
pub const SED_STATUS_SP_FROZEN: i32 = 0x06;
pub const SED_STATUS_NO_SESSIONS_AVAILABLE: i32 = 0x07;
pub const SED_STATUS_UNIQUENESS_CONFLICT: i32 = 0x08;
pub const SED_STATUS_INSUFFICIENT_SPACE: i32 = 0x09;
pub const SED_STATUS_INSUFFICIENT_ROWS: i32 = 0x0A;
pub const SED_STATUS_INVALID_PARAMETER: i32 = 0x0C;
pub const SED_STATUS_OBSOLETE_2: i32 = 0x0D;
pub const SED_STATUS_OBSOLETE_3: i32 = 0x0E;
pub const SED_STATUS_TPER_MALFUNCTION: i32 = 0x0F;
pub const SED_STATUS_TRANSACTION_FAILURE: i32 = 0x10;
pub const SED_STATUS_RESPONSE_OVERFLOW: i32 = 0x11;
pub const SED_STATUS_AUTHORITY_LOCKED_OUT: i32 = 0x12;
pub const SED_STATUS_FAIL: i32 = 0x3F;
pub const SED_STATUS_NO_METHOD_STATUS: i32 = 0x89;

/// A raw channel status.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Status(i32);

impl Status {
    pub const fn new(code: i32) -> Self {
        Status(code)
    }

    pub const fn from_errno(errno: i32) -> Self {
        Status(-errno)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == SED_STATUS_SUCCESS
    }

    /// Human readable text for the status.
    pub fn text(self) -> Cow<'static, str> {
        if self.0 < 0 {
            return Cow::Borrowed(Errno::from_raw(-self.0).desc());
        }
        let s = match self.0 {
            SED_STATUS_SUCCESS => "Success",
            SED_STATUS_NOT_AUTHORIZED => "Host Not Authorized",
            SED_STATUS_OBSOLETE_1 | SED_STATUS_OBSOLETE_2 | SED_STATUS_OBSOLETE_3 => "Obsolete",
            SED_STATUS_SP_BUSY => "SP Session Busy",
            SED_STATUS_SP_FAILED => "SP Failed",
            SED_STATUS_SP_DISABLED => "SP Disabled",
            SED_STATUS_SP_FROZEN => "SP Frozen",
            SED_STATUS_NO_SESSIONS_AVAILABLE => "No Sessions Available",
            SED_STATUS_UNIQUENESS_CONFLICT => "Uniqueness Conflict",
            SED_STATUS_INSUFFICIENT_SPACE => "Insufficient Space",
            SED_STATUS_INSUFFICIENT_ROWS => "Insufficient Rows",
            SED_STATUS_INVALID_PARAMETER => "Invalid Parameter",
            SED_STATUS_TPER_MALFUNCTION => "TPER Malfunction",
            SED_STATUS_TRANSACTION_FAILURE => "Transaction Failure",
            SED_STATUS_RESPONSE_OVERFLOW => "Response Overflow",
            SED_STATUS_AUTHORITY_LOCKED_OUT => "Authority Locked Out",
            SED_STATUS_FAIL => "Failed",
            SED_STATUS_NO_METHOD_STATUS => "Method returned no status",
            _ => "Unknown Error",
        };
        Cow::Borrowed(s)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Status used when a device answers discovery without a locking feature.
pub fn unsupported() -> Status {
    Status::from_errno(libc::EOPNOTSUPP)
}

/// Map a status onto the error taxonomy. `None` means success.
pub fn classify(status: Status) -> Option<ErrorKind> {
    match status.code() {
        SED_STATUS_SUCCESS => None,
        SED_STATUS_NOT_AUTHORIZED | SED_STATUS_AUTHORITY_LOCKED_OUT => {
            Some(ErrorKind::AuthFailure)
        }
        c if c == -libc::EOPNOTSUPP || c == -libc::ENOTTY => Some(ErrorKind::NotSupported),
        c if c == -libc::ENOMEM => Some(ErrorKind::AllocationFailure),
        _ => Some(ErrorKind::ProtocolFailure),
    }
}

/// Turn a status into a result.
pub fn check_status(status: Status) -> Result<()> {
    match classify(status) {
        None => Ok(()),
        Some(ErrorKind::NotSupported) => Err(SedError::NotSupported(status)),
        Some(ErrorKind::AuthFailure) => Err(SedError::AuthFailure(status)),
        Some(ErrorKind::AllocationFailure) => Err(SedError::AllocationFailure(status)),
        Some(_) => Err(SedError::ProtocolFailure(Fault::Status(status))),
    }
}

/// Turn a channel response into its payload, or the classified error.
pub fn check(response: Response) -> Result<Vec<u8>> {
    let status = Status::new(response.status);
    debug!(status = status.code(), text = %status, "channel response");
    check_status(status)?;
    Ok(response.payload)
}

/// How an error is surfaced to the operator for a given verb.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    /// The device lacks an optional capability; probing for it is legitimate.
    Informational,
    /// A rejected credential the operator needs to hear about plainly.
    Recoverable,
    Fatal,
}

pub fn severity(verb: Verb, err: &SedError) -> Severity {
    match (err.kind(), verb) {
        (ErrorKind::NotSupported, Verb::Password) => Severity::Fatal,
        (ErrorKind::NotSupported, _) => Severity::Informational,
        (ErrorKind::AuthFailure, Verb::Revert | Verb::Password) => Severity::Recoverable,
        _ => Severity::Fatal,
    }
}

/// The line written to stderr for `err`, if any.
pub fn report(verb: Verb, err: &SedError) -> Option<String> {
    match severity(verb, err) {
        Severity::Informational => None,
        Severity::Recoverable => Some(match verb {
            Verb::Password => format!(
                "{verb}: the device did not accept the current password ({err}); \
                 the password was not changed"
            ),
            _ => format!(
                "{verb}: the device did not accept the supplied key or PSID ({err}); \
                 nothing was reverted"
            ),
        }),
        Severity::Fatal => Some(format!("{verb}: SED error - {err}")),
    }
}
