use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::request::{OperationRequest, Verb};

/// Drive NVMe self-encrypting drives through the Opal locking lifecycle
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct KeyArgs {
    /// Prompt for the SED authentication key instead of using the default credential
    #[arg(short = 'k', long)]
    pub ask_key: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query the device and display locking features
    Discover {
        /// NVMe block device, e.g. /dev/nvme0n1
        device: PathBuf,
        /// Print extended discovery information
        #[arg(short, long)]
        verbose: bool,
        /// Print locking information in a form suitable for udev rules
        #[arg(short, long)]
        udev: bool,
    },
    /// Take ownership of the device and enable locking
    Initialize {
        device: PathBuf,
        /// Set the locking range to read-only
        #[arg(short, long)]
        read_only: bool,
        /// Prompt for a new owner password instead of using the default credential
        #[arg(short = 'k', long)]
        ask_key: bool,
    },
    /// Lock the device
    Lock {
        device: PathBuf,
        /// Lock for writing only; reads stay allowed
        #[arg(short, long)]
        read_only: bool,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Unlock the device
    Unlock {
        device: PathBuf,
        /// Unlock for reading only
        #[arg(short, long)]
        read_only: bool,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Revert the device to its factory state
    Revert {
        device: PathBuf,
        /// Owner-authenticated revert; erases all data
        #[arg(short = 'e', long)]
        destructive: bool,
        /// Revert with the PSID printed on the drive label; erases all data
        #[arg(short, long)]
        psid: bool,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Change the owner password
    Password {
        device: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Command::Discover { .. } => Verb::Discover,
            Command::Initialize { .. } => Verb::Initialize,
            Command::Lock { .. } => Verb::Lock,
            Command::Unlock { .. } => Verb::Unlock,
            Command::Revert { .. } => Verb::Revert,
            Command::Password { .. } => Verb::Password,
        }
    }

    /// Split into the target device and the request to run against it.
    pub fn into_parts(self) -> (PathBuf, OperationRequest) {
        let mut req = OperationRequest::new(self.verb());
        let device = match self {
            Command::Discover {
                device,
                verbose,
                udev,
            } => {
                req.verbose = verbose;
                req.udev = udev;
                device
            }
            Command::Initialize {
                device,
                read_only,
                ask_key,
            } => {
                req.read_only = read_only;
                req.ask_key = ask_key;
                device
            }
            Command::Lock {
                device,
                read_only,
                key,
            }
            | Command::Unlock {
                device,
                read_only,
                key,
            } => {
                req.read_only = read_only;
                req.ask_key = key.ask_key;
                device
            }
            Command::Revert {
                device,
                destructive,
                psid,
                key,
            } => {
                req.destructive = destructive;
                req.use_psid = psid;
                req.ask_key = key.ask_key;
                device
            }
            Command::Password { device, key } => {
                req.ask_key = key.ask_key;
                device
            }
        };
        (device, req)
    }
}
