use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::opal::OpalDeviceState;
use crate::request::Verb;
use crate::status::Status;

/// The closed set of outcome kinds every failure is reduced to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Config,
    NotSupported,
    AuthFailure,
    ProtocolFailure,
    AllocationFailure,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 2,
            ErrorKind::NotSupported => 3,
            ErrorKind::AuthFailure => 4,
            ErrorKind::ProtocolFailure => 5,
            ErrorKind::AllocationFailure => 6,
        }
    }
}

/// Problems with the request or the target, detected before the device is
/// asked to change anything.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "{} is not a block device; the NVMe namespace block device \
         (e.g. /dev/nvme0n1) must be specified",
        .0.display()
    )]
    NotABlockDevice(PathBuf),

    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("exactly one of --destructive or --psid is required")]
    RevertMode,

    #[error("--psid is only valid for revert")]
    PsidOutsideRevert,

    #[error("cannot {verb} a device that is {state}")]
    InvalidState { verb: Verb, state: OpalDeviceState },

    #[error("empty password")]
    EmptySecret,

    #[error("password longer than {max} bytes")]
    SecretTooLong { max: usize },

    #[error("passwords do not match")]
    SecretMismatch,

    #[error("cannot read password: {0}")]
    Prompt(#[source] io::Error),
}

/// Why the protocol exchange itself failed.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("{0}")]
    Status(Status),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Error)]
pub enum SedError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    NotSupported(Status),

    #[error("{0}")]
    AuthFailure(Status),

    #[error("{0}")]
    ProtocolFailure(Fault),

    #[error("{0}")]
    AllocationFailure(Status),
}

impl SedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SedError::Config(_) => ErrorKind::Config,
            SedError::NotSupported(_) => ErrorKind::NotSupported,
            SedError::AuthFailure(_) => ErrorKind::AuthFailure,
            SedError::ProtocolFailure(_) => ErrorKind::ProtocolFailure,
            SedError::AllocationFailure(_) => ErrorKind::AllocationFailure,
        }
    }
}

impl From<DiscoveryError> for SedError {
    fn from(e: DiscoveryError) -> Self {
        SedError::ProtocolFailure(Fault::Discovery(e))
    }
}

pub type Result<T> = std::result::Result<T, SedError>;
