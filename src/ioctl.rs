#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

//! Linux `<linux/sed-opal.h>` ioctl transport.
//!
//! The structures mirror the kernel UAPI layout exactly; the kernel's
//! sed-opal driver performs the TCG session and method encoding.

use core::mem::zeroed;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::raw::c_int;

use nix::ioctl_write_ptr;
use tracing::debug;
use zeroize::Zeroize;

use crate::channel::{KeyMaterial, LockState, Request, Response, SecurityChannel};
use crate::discovery::DISCOVERY_BUF_SIZE;

pub const OPAL_KEY_MAX: usize = 256;
pub const OPAL_MAX_LRS: usize = 9;

// opal_key_type
pub const OPAL_INCLUDED: u8 = 0;
pub const OPAL_KEYRING: u8 = 1;

// opal_user
pub const OPAL_ADMIN1: u32 = 0;

// opal_lock_state
pub const OPAL_RO: u32 = 0x01;
pub const OPAL_RW: u32 = 0x02;
pub const OPAL_LK: u32 = 0x04;

#[repr(C)]
pub struct opal_key {
    pub lr: u8,
    pub key_len: u8,
    pub key_type: u8,
    pub __align: [u8; 5],
    pub key: [u8; OPAL_KEY_MAX],
}

impl Drop for opal_key {
    fn drop(&mut self) {
        self.key.zeroize();
        self.key_len = 0;
    }
}

#[repr(C)]
pub struct opal_lr_act {
    pub key: opal_key,
    pub sum: u32,
    pub num_lrs: u8,
    pub lr: [u8; OPAL_MAX_LRS],
    pub align: [u8; 2],
}

#[repr(C)]
pub struct opal_session_info {
    pub sum: u32,
    pub who: u32,
    pub opal_key: opal_key,
}

#[repr(C)]
pub struct opal_user_lr_setup {
    pub range_start: u64,
    pub range_length: u64,
    pub rle: u32,
    pub wle: u32,
    pub session: opal_session_info,
}

#[repr(C)]
pub struct opal_lock_unlock {
    pub session: opal_session_info,
    pub l_state: u32,
    pub flags: u16,
    pub __align: [u8; 2],
}

#[repr(C)]
pub struct opal_new_pw {
    pub session: opal_session_info,
    pub new_user_pw: opal_session_info,
}

#[repr(C)]
#[derive(Default)]
pub struct opal_discovery {
    pub data: u64,
    pub size: u64,
}

ioctl_write_ptr!(ioc_opal_lock_unlock, b'p', 221, opal_lock_unlock);
ioctl_write_ptr!(ioc_opal_take_ownership, b'p', 222, opal_key);
ioctl_write_ptr!(ioc_opal_activate_lsp, b'p', 223, opal_lr_act);
ioctl_write_ptr!(ioc_opal_set_pw, b'p', 224, opal_new_pw);
ioctl_write_ptr!(ioc_opal_revert_tpr, b'p', 226, opal_key);
ioctl_write_ptr!(ioc_opal_lr_setup, b'p', 227, opal_user_lr_setup);
ioctl_write_ptr!(ioc_opal_psid_revert_tpr, b'p', 232, opal_key);
ioctl_write_ptr!(ioc_opal_discovery, b'p', 239, opal_discovery);

macro_rules! impl_default_zeroed {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Default for $t {
                fn default() -> Self { unsafe { zeroed() } }
            }
        )+
    };
}

impl_default_zeroed!(
    opal_key,
    opal_session_info,
    opal_lock_unlock,
    opal_new_pw,
    opal_user_lr_setup,
    opal_lr_act,
);

/// Build an [`opal_key`] for locking range `lr`.
///
/// Keyring material leaves `key_len` at zero so the kernel substitutes the
/// key it holds.
fn opal_key_for(material: KeyMaterial<'_>, lr: u8) -> opal_key {
    let mut key = opal_key::default();
    key.lr = lr;
    match material {
        KeyMaterial::Keyring => key.key_type = OPAL_KEYRING,
        KeyMaterial::Included(bytes) => {
            let n = bytes.len().min(u8::MAX as usize);
            key.key_type = OPAL_INCLUDED;
            key.key_len = n as u8;
            key.key[..n].copy_from_slice(&bytes[..n]);
        }
    }
    key
}

/// Session info for the Admin1 authority at locking range `lr`.
fn build_session_admin1(material: KeyMaterial<'_>, lr: u8) -> opal_session_info {
    let mut sess = opal_session_info::default();
    sess.who = OPAL_ADMIN1;
    sess.opal_key = opal_key_for(material, lr);
    sess
}

fn l_state(state: LockState) -> u32 {
    match state {
        LockState::ReadOnly => OPAL_RO,
        LockState::Locked => OPAL_LK,
        LockState::ReadWrite => OPAL_RW,
    }
}

fn into_response(result: nix::Result<c_int>) -> Response {
    match result {
        Ok(status) => Response::status(status),
        Err(errno) => Response::status(-(errno as i32)),
    }
}

/// Security channel over the sed-opal ioctls of an open block device.
pub struct IoctlChannel {
    file: File,
}

impl IoctlChannel {
    pub fn new(file: File) -> Self {
        IoctlChannel { file }
    }

    fn discovery(&self) -> Response {
        let mut buf: Vec<u8> = Vec::new();
        if buf.try_reserve_exact(DISCOVERY_BUF_SIZE).is_err() {
            return Response::status(-libc::ENOMEM);
        }
        buf.resize(DISCOVERY_BUF_SIZE, 0);
        let disc = opal_discovery {
            data: buf.as_mut_ptr() as u64,
            size: buf.len() as u64,
        };

        // Safety: the fd stays open for the call and `disc` describes a live
        // buffer of `size` bytes.
        match unsafe { ioc_opal_discovery(self.file.as_raw_fd(), &disc) } {
            Ok(len) => {
                // the kernel returns the response length
                if len > 0 && (len as usize) < buf.len() {
                    buf.truncate(len as usize);
                }
                Response::ok(buf)
            }
            Err(errno) => Response::status(-(errno as i32)),
        }
    }
}

impl SecurityChannel for IoctlChannel {
    fn exchange(&mut self, request: &Request<'_>) -> Response {
        let fd = self.file.as_raw_fd();
        debug!(fd, request = request.name(), "ioctl");

        // Safety (all arms): `fd` is owned by `self.file` for the duration of
        // the call and every argument is a fully initialized repr(C) value that
        // outlives it.
        let result = match *request {
            Request::Discovery => return self.discovery(),
            Request::TakeOwnership { key } => {
                let arg = opal_key_for(key, 0);
                unsafe { ioc_opal_take_ownership(fd, &arg) }
            }
            Request::ActivateLockingSp { key, ranges } => {
                let mut arg = opal_lr_act::default();
                arg.key = opal_key_for(key, 0);
                let n = ranges.len().min(OPAL_MAX_LRS);
                arg.num_lrs = n as u8;
                arg.lr[..n].copy_from_slice(&ranges[..n]);
                unsafe { ioc_opal_activate_lsp(fd, &arg) }
            }
            Request::SetupRange {
                key,
                range,
                read_lock_enabled,
                write_lock_enabled,
            } => {
                let mut arg = opal_user_lr_setup::default();
                arg.rle = read_lock_enabled as u32;
                arg.wle = write_lock_enabled as u32;
                arg.session = build_session_admin1(key, range);
                unsafe { ioc_opal_lr_setup(fd, &arg) }
            }
            Request::LockUnlock { key, range, state } => {
                let mut arg = opal_lock_unlock::default();
                arg.session = build_session_admin1(key, range);
                arg.l_state = l_state(state);
                unsafe { ioc_opal_lock_unlock(fd, &arg) }
            }
            Request::SetPassword { current, new } => {
                let mut arg = opal_new_pw::default();
                arg.session = build_session_admin1(current, 0);
                arg.new_user_pw = build_session_admin1(new, 0);
                unsafe { ioc_opal_set_pw(fd, &arg) }
            }
            Request::RevertTper { key } => {
                let arg = opal_key_for(key, 0);
                unsafe { ioc_opal_revert_tpr(fd, &arg) }
            }
            Request::PsidRevert { psid } => {
                let arg = opal_key_for(psid, 0);
                unsafe { ioc_opal_psid_revert_tpr(fd, &arg) }
            }
        };
        into_response(result)
    }
}
