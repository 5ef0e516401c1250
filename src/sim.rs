//! In-memory Opal drive.
//!
//! Stands in for real hardware in tests and demos. Every channel connected
//! to a [`SimulatedDrive`] shares the same drive state, so state carries over
//! between invocations the way it does on a real device.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::channel::{KeyMaterial, LockState, Request, Response, SecurityChannel};
use crate::device::{DeviceProvider, Opened};
use crate::discovery::{
    PageBuilder, FEATURE_LOCKING, FEATURE_OPAL_V2, FEATURE_TPER, OPAL_FEATURE_LOCKED,
    OPAL_FEATURE_LOCKING_ENABLED, OPAL_FEATURE_LOCKING_SUPPORTED, OPAL_FEATURE_MEDIA_ENCRYPT,
};
use crate::opal::{LockingRange, OpalDeviceState, GLOBAL_RANGE};
use crate::status::{
    SED_STATUS_INVALID_PARAMETER, SED_STATUS_NOT_AUTHORIZED, SED_STATUS_SP_DISABLED,
};

/// Who the drive currently accepts as owner.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Owner {
    /// Factory state: the manufacturer's default credential.
    Factory,
    /// Owned with the default credential.
    Default,
    Custom(Vec<u8>),
}

impl Owner {
    fn from_key(key: KeyMaterial<'_>) -> Self {
        match key {
            KeyMaterial::Keyring => Owner::Default,
            KeyMaterial::Included(k) => Owner::Custom(k.to_vec()),
        }
    }

    fn accepts(&self, key: KeyMaterial<'_>) -> bool {
        match (self, key) {
            (Owner::Factory | Owner::Default, KeyMaterial::Keyring) => true,
            (Owner::Custom(expected), KeyMaterial::Included(k)) => expected.as_slice() == k,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    block_device: bool,
    supported: bool,
    locking_descriptor: bool,
    psid: Vec<u8>,
    owner: Owner,
    state: OpalDeviceState,
    range: LockingRange,
    opens: usize,
    releases: usize,
    exchanges: usize,
    injected: VecDeque<i32>,
}

impl Inner {
    fn factory_reset(&mut self) {
        self.owner = Owner::Factory;
        self.state = OpalDeviceState::Uninitialized;
        self.range = LockingRange::default();
    }

    fn discovery_page(&self) -> Vec<u8> {
        let mut flags = OPAL_FEATURE_LOCKING_SUPPORTED | OPAL_FEATURE_MEDIA_ENCRYPT;
        if self.state.is_initialized() {
            flags |= OPAL_FEATURE_LOCKING_ENABLED;
        }
        if self.range.locked {
            flags |= OPAL_FEATURE_LOCKED;
        }
        let mut page =
            PageBuilder::new().feature(FEATURE_TPER, 1, &[0x11, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        if self.locking_descriptor {
            page = page.feature(FEATURE_LOCKING, 1, &[flags, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        }
        page.feature(
            FEATURE_OPAL_V2,
            1,
            &[0x10, 0x01, 0x00, 0x01, 0x00, 0x00, 0x04, 0x00, 0x08, 0x00, 0x00, 0, 0, 0, 0, 0],
        )
        .build()
    }

    fn handle(&mut self, request: &Request<'_>) -> Response {
        use OpalDeviceState::*;

        if let Some(status) = self.injected.pop_front() {
            return Response::status(status);
        }
        if !self.supported {
            return Response::status(-libc::EOPNOTSUPP);
        }

        let status = match *request {
            Request::Discovery => return Response::ok(self.discovery_page()),
            Request::TakeOwnership { key } => {
                if self.owner != Owner::Factory {
                    SED_STATUS_NOT_AUTHORIZED
                } else {
                    self.owner = Owner::from_key(key);
                    0
                }
            }
            Request::ActivateLockingSp { key, ranges } => {
                if self.owner == Owner::Factory || !self.owner.accepts(key) {
                    SED_STATUS_NOT_AUTHORIZED
                } else if self.state != Uninitialized || ranges != [GLOBAL_RANGE] {
                    SED_STATUS_INVALID_PARAMETER
                } else {
                    self.state = Initialized;
                    self.range = LockingRange::default();
                    0
                }
            }
            Request::SetupRange {
                key,
                range,
                read_lock_enabled,
                ..
            } => {
                if !self.state.is_initialized() {
                    SED_STATUS_SP_DISABLED
                } else if !self.owner.accepts(key) {
                    SED_STATUS_NOT_AUTHORIZED
                } else if range != GLOBAL_RANGE {
                    SED_STATUS_INVALID_PARAMETER
                } else {
                    self.range.read_only = !read_lock_enabled;
                    0
                }
            }
            Request::LockUnlock { key, range, state } => {
                if !self.state.is_initialized() {
                    SED_STATUS_SP_DISABLED
                } else if !self.owner.accepts(key) {
                    SED_STATUS_NOT_AUTHORIZED
                } else if range != GLOBAL_RANGE {
                    SED_STATUS_INVALID_PARAMETER
                } else {
                    // level 0 reports a write-locked range as locked
                    self.range.locked = state != LockState::ReadWrite;
                    self.range.read_only = state == LockState::ReadOnly;
                    self.state = if self.range.locked { Locked } else { Unlocked };
                    0
                }
            }
            Request::SetPassword { current, new } => {
                if !self.state.is_initialized() {
                    SED_STATUS_SP_DISABLED
                } else if !self.owner.accepts(current) {
                    SED_STATUS_NOT_AUTHORIZED
                } else {
                    self.owner = Owner::from_key(new);
                    0
                }
            }
            Request::RevertTper { key } => {
                if !self.owner.accepts(key) {
                    SED_STATUS_NOT_AUTHORIZED
                } else {
                    self.factory_reset();
                    0
                }
            }
            Request::PsidRevert { psid } => match psid {
                KeyMaterial::Included(k) if k == self.psid.as_slice() => {
                    self.factory_reset();
                    0
                }
                _ => SED_STATUS_NOT_AUTHORIZED,
            },
        };
        Response::status(status)
    }
}

/// A simulated Opal drive, acting as its own [`DeviceProvider`].
#[derive(Clone, Debug)]
pub struct SimulatedDrive {
    inner: Rc<RefCell<Inner>>,
}

impl SimulatedDrive {
    /// A factory-fresh block device with the given label PSID.
    pub fn new(psid: &str) -> Self {
        SimulatedDrive {
            inner: Rc::new(RefCell::new(Inner {
                block_device: true,
                supported: true,
                locking_descriptor: true,
                psid: psid.as_bytes().to_vec(),
                owner: Owner::Factory,
                state: OpalDeviceState::Uninitialized,
                range: LockingRange::default(),
                opens: 0,
                releases: 0,
                exchanges: 0,
                injected: VecDeque::new(),
            })),
        }
    }

    /// Present the drive as a character device.
    pub fn character_device(self) -> Self {
        self.inner.borrow_mut().block_device = false;
        self
    }

    /// A drive without the locking feature.
    pub fn unsupported(self) -> Self {
        self.inner.borrow_mut().supported = false;
        self
    }

    /// A drive that answers discovery without a Locking descriptor.
    pub fn without_locking(self) -> Self {
        self.inner.borrow_mut().locking_descriptor = false;
        self
    }

    /// Skip to an owned, initialized drive. `password` of `None` leaves the
    /// default credential in place.
    pub fn provisioned(self, password: Option<&str>, locked: bool) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            inner.owner = match password {
                Some(p) => Owner::Custom(p.as_bytes().to_vec()),
                None => Owner::Default,
            };
            inner.range = LockingRange {
                index: GLOBAL_RANGE,
                read_only: false,
                locked,
            };
            inner.state = if locked {
                OpalDeviceState::Locked
            } else {
                OpalDeviceState::Initialized
            };
        }
        self
    }

    /// Answer the next exchange with `status` instead of executing it.
    pub fn inject_status(&self, status: i32) {
        self.inner.borrow_mut().injected.push_back(status);
    }

    pub fn state(&self) -> OpalDeviceState {
        self.inner.borrow().state
    }

    pub fn range(&self) -> LockingRange {
        self.inner.borrow().range
    }

    pub fn opens(&self) -> usize {
        self.inner.borrow().opens
    }

    pub fn releases(&self) -> usize {
        self.inner.borrow().releases
    }

    pub fn exchanges(&self) -> usize {
        self.inner.borrow().exchanges
    }

    /// True when the drive is indistinguishable from one out of the box.
    pub fn is_factory_fresh(&self) -> bool {
        let inner = self.inner.borrow();
        inner.owner == Owner::Factory
            && inner.state == OpalDeviceState::Uninitialized
            && inner.range == LockingRange::default()
    }
}

impl DeviceProvider for SimulatedDrive {
    type Channel = SimulatedChannel;

    fn open(&self, path: &Path) -> io::Result<Opened<SimulatedChannel>> {
        let mut inner = self.inner.borrow_mut();
        if !inner.block_device {
            return Ok(Opened::NotBlock);
        }
        inner.opens += 1;
        debug!(device = %path.display(), "simulated drive connected");
        Ok(Opened::Block(SimulatedChannel {
            inner: Rc::clone(&self.inner),
        }))
    }
}

/// Channel to a [`SimulatedDrive`]. Counts as released when dropped.
#[derive(Debug)]
pub struct SimulatedChannel {
    inner: Rc<RefCell<Inner>>,
}

impl SecurityChannel for SimulatedChannel {
    fn exchange(&mut self, request: &Request<'_>) -> Response {
        let mut inner = self.inner.borrow_mut();
        inner.exchanges += 1;
        inner.handle(request)
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        self.inner.borrow_mut().releases += 1;
    }
}
