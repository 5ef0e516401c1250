use std::fmt;

use crate::error::ConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Verb {
    Discover,
    Initialize,
    Lock,
    Unlock,
    Revert,
    Password,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Discover => "discover",
            Verb::Initialize => "initialize",
            Verb::Lock => "lock",
            Verb::Unlock => "unlock",
            Verb::Revert => "revert",
            Verb::Password => "password",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RevertMode {
    /// Owner-authenticated TPer revert. Erases all data.
    Destructive,
    /// Revert authenticated by the Physical Security ID on the drive label.
    Psid,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryStyle {
    Normal,
    Verbose,
    Udev,
}

/// Everything one invocation asked for.
///
/// Built once from the command line and handed to each component by
/// reference; nothing mutates it afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationRequest {
    pub verb: Verb,
    pub read_only: bool,
    pub ask_key: bool,
    pub destructive: bool,
    pub use_psid: bool,
    pub verbose: bool,
    pub udev: bool,
}

impl OperationRequest {
    pub fn new(verb: Verb) -> Self {
        OperationRequest {
            verb,
            read_only: false,
            ask_key: false,
            destructive: false,
            use_psid: false,
            verbose: false,
            udev: false,
        }
    }

    /// Reject modifier combinations that cannot be executed. Runs before the
    /// device is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_psid && self.verb != Verb::Revert {
            return Err(ConfigError::PsidOutsideRevert);
        }
        if self.verb == Verb::Revert {
            self.revert_mode()?;
        }
        Ok(())
    }

    pub fn revert_mode(&self) -> Result<RevertMode, ConfigError> {
        match (self.destructive, self.use_psid) {
            (true, false) => Ok(RevertMode::Destructive),
            (false, true) => Ok(RevertMode::Psid),
            _ => Err(ConfigError::RevertMode),
        }
    }

    pub fn discovery_style(&self) -> DiscoveryStyle {
        if self.udev {
            DiscoveryStyle::Udev
        } else if self.verbose {
            DiscoveryStyle::Verbose
        } else {
            DiscoveryStyle::Normal
        }
    }
}
