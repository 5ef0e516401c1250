//! The Opal locking lifecycle.
//!
//! ```text
//! Uninitialized --initialize--> Initialized
//! Initialized   --lock-------> Locked
//! Locked        --unlock-----> Unlocked
//! Unlocked      --lock-------> Locked
//! {any state}   --revert-----> Uninitialized
//! ```
//!
//! `password` loops on any initialized state. Preconditions are checked
//! against a level 0 discovery taken at the start of each operation; a
//! violation is reported before any request that could change the drive.

use std::fmt;

use tracing::{debug, info};

use crate::channel::{LockState, Request, SecurityChannel};
use crate::credential::{self, Credential, SecretPrompt};
use crate::device::Device;
use crate::discovery::{Discovery, Level0};
use crate::error::{ConfigError, Result, SedError};
use crate::request::{OperationRequest, RevertMode, Verb};
use crate::status;

/// Index of the global locking range.
pub const GLOBAL_RANGE: u8 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OpalDeviceState {
    Uninitialized,
    Initialized,
    Locked,
    Unlocked,
}

impl OpalDeviceState {
    pub fn is_initialized(self) -> bool {
        self != OpalDeviceState::Uninitialized
    }
}

impl fmt::Display for OpalDeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpalDeviceState::Uninitialized => "uninitialized",
            OpalDeviceState::Initialized => "initialized",
            OpalDeviceState::Locked => "locked",
            OpalDeviceState::Unlocked => "unlocked",
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LockingRange {
    pub index: u8,
    pub read_only: bool,
    pub locked: bool,
}

/// Runs one verb against one device.
pub struct Controller<'p, P: SecretPrompt + ?Sized> {
    prompt: &'p mut P,
}

impl<'p, P: SecretPrompt + ?Sized> Controller<'p, P> {
    pub fn new(prompt: &'p mut P) -> Self {
        Controller { prompt }
    }

    fn submit<C: SecurityChannel>(
        device: &mut Device<C>,
        request: &Request<'_>,
    ) -> Result<Vec<u8>> {
        debug!(device = %device.path().display(), request = request.name(), "exchange");
        status::check(device.exchange(request))
    }

    fn snapshot<C: SecurityChannel>(device: &mut Device<C>) -> Result<Discovery> {
        let page = Self::submit(device, &Request::Discovery)?;
        Ok(Discovery::from_level0(Level0::parse(&page)?))
    }

    /// Snapshot for a verb about to change the drive. A drive without
    /// locking support cannot take part in the lifecycle.
    fn probe<C: SecurityChannel>(device: &mut Device<C>) -> Result<Discovery> {
        let discovery = Self::snapshot(device)?;
        if !discovery.locking_supported() {
            return Err(SedError::NotSupported(status::unsupported()));
        }
        Ok(discovery)
    }

    fn require_initialized<C: SecurityChannel>(
        device: &mut Device<C>,
        verb: Verb,
    ) -> Result<OpalDeviceState> {
        let state = Self::probe(device)?.state;
        if !state.is_initialized() {
            return Err(ConfigError::InvalidState { verb, state }.into());
        }
        Ok(state)
    }

    /// Read-only snapshot of locking support and the locking ranges. A drive
    /// without locking support still gets a report.
    pub fn discover<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        _request: &OperationRequest,
    ) -> Result<Discovery> {
        let discovery = Self::snapshot(device)?;
        debug!(state = %discovery.state, "discovered");
        Ok(discovery)
    }

    /// Take ownership, activate the Locking SP and set up the global range.
    pub fn initialize<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
    ) -> Result<()> {
        let state = Self::probe(device)?.state;
        if state != OpalDeviceState::Uninitialized {
            return Err(ConfigError::InvalidState {
                verb: request.verb,
                state,
            }
            .into());
        }

        let owner = if request.ask_key {
            credential::resolve_new(&mut *self.prompt)?
        } else {
            Credential::DefaultOwner
        };
        let key = owner.material();

        Self::submit(device, &Request::TakeOwnership { key })?;
        Self::submit(
            device,
            &Request::ActivateLockingSp {
                key,
                ranges: &[GLOBAL_RANGE],
            },
        )?;
        Self::submit(
            device,
            &Request::SetupRange {
                key,
                range: GLOBAL_RANGE,
                read_lock_enabled: !request.read_only,
                write_lock_enabled: true,
            },
        )?;

        info!(
            device = %device.path().display(),
            credential = owner.kind(),
            read_only = request.read_only,
            "initialized"
        );
        Ok(())
    }

    pub fn lock<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
    ) -> Result<()> {
        self.lock_unlock(device, request, true)
    }

    pub fn unlock<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
    ) -> Result<()> {
        self.lock_unlock(device, request, false)
    }

    fn lock_unlock<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
        lock: bool,
    ) -> Result<()> {
        let before = Self::require_initialized(device, request.verb)?;
        let credential = credential::resolve(&mut *self.prompt, request)?;
        Self::submit(
            device,
            &Request::LockUnlock {
                key: credential.material(),
                range: GLOBAL_RANGE,
                state: LockState::for_request(lock, request.read_only),
            },
        )?;
        info!(
            device = %device.path().display(),
            %before,
            read_only = request.read_only,
            "{}",
            if lock { "locked" } else { "unlocked" }
        );
        Ok(())
    }

    /// Return the drive to factory state. Valid from any state.
    pub fn revert<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
    ) -> Result<()> {
        let mode = request.revert_mode()?;
        let credential = credential::resolve(&mut *self.prompt, request)?;
        let req = match mode {
            RevertMode::Destructive => Request::RevertTper {
                key: credential.material(),
            },
            RevertMode::Psid => Request::PsidRevert {
                psid: credential.material(),
            },
        };
        Self::submit(device, &req)?;
        info!(device = %device.path().display(), ?mode, "reverted");
        Ok(())
    }

    /// Replace the owner credential after authenticating with the current one.
    pub fn password<C: SecurityChannel>(
        &mut self,
        device: &mut Device<C>,
        request: &OperationRequest,
    ) -> Result<()> {
        Self::require_initialized(device, request.verb)?;
        let current = credential::resolve(&mut *self.prompt, request)?;
        let new = credential::resolve_new(&mut *self.prompt)?;
        Self::submit(
            device,
            &Request::SetPassword {
                current: current.material(),
                new: new.material(),
            },
        )?;
        info!(device = %device.path().display(), "password changed");
        Ok(())
    }
}
