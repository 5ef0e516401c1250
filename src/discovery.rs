//! TCG level 0 discovery parsing and rendering.

use std::fmt::{self, Write as _};

use thiserror::Error;
use tracing::debug;

use crate::opal::{LockingRange, OpalDeviceState};
use crate::request::DiscoveryStyle;

pub const DISCOVERY_BUF_SIZE: usize = 4096;
pub const DISCOVERY_HEADER_LEN: usize = 48;
const DESCRIPTOR_HEADER_LEN: usize = 4;

pub const FEATURE_TPER: u16 = 0x0001;
pub const FEATURE_LOCKING: u16 = 0x0002;
pub const FEATURE_GEOMETRY: u16 = 0x0003;
pub const FEATURE_OPAL_V1: u16 = 0x0200;
pub const FEATURE_SINGLE_USER_MODE: u16 = 0x0201;
pub const FEATURE_DATASTORE: u16 = 0x0202;
pub const FEATURE_OPAL_V2: u16 = 0x0203;
pub const FEATURE_PYRITE_V1: u16 = 0x0302;
pub const FEATURE_PYRITE_V2: u16 = 0x0303;
pub const FEATURE_RUBY: u16 = 0x0304;
pub const FEATURE_BLOCK_SID_AUTH: u16 = 0x0402;
pub const FEATURE_DATA_REMOVAL: u16 = 0x0404;

pub const OPAL_FEATURE_LOCKING_SUPPORTED: u8 = 0x01;
pub const OPAL_FEATURE_LOCKING_ENABLED: u8 = 0x02;
pub const OPAL_FEATURE_LOCKED: u8 = 0x04;
pub const OPAL_FEATURE_MEDIA_ENCRYPT: u8 = 0x08;
pub const OPAL_FEATURE_MBR_ENABLED: u8 = 0x10;
pub const OPAL_FEATURE_MBR_DONE: u8 = 0x20;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DiscoveryError {
    #[error("discovery response too short: {0} bytes")]
    TooShort(usize),
    #[error("locking feature present but payload is empty")]
    EmptyLocking,
}

/// One feature descriptor from the discovery response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Feature {
    pub code: u16,
    pub version: u8,
    pub data: Vec<u8>,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self.code {
            FEATURE_TPER => "TPer",
            FEATURE_LOCKING => "Locking",
            FEATURE_GEOMETRY => "Geometry Reporting",
            FEATURE_OPAL_V1 => "Opal SSC V1.00",
            FEATURE_SINGLE_USER_MODE => "Single User Mode",
            FEATURE_DATASTORE => "DataStore Table",
            FEATURE_OPAL_V2 => "Opal SSC V2.00",
            FEATURE_PYRITE_V1 => "Pyrite SSC V1.00",
            FEATURE_PYRITE_V2 => "Pyrite SSC V2.00",
            FEATURE_RUBY => "Ruby SSC",
            FEATURE_BLOCK_SID_AUTH => "Block SID Authentication",
            FEATURE_DATA_REMOVAL => "Data Removal Mechanism",
            _ => "Unknown",
        }
    }

    fn byte(&self, i: usize) -> u8 {
        self.data.get(i).copied().unwrap_or(0)
    }

    fn be16(&self, i: usize) -> u16 {
        u16::from_be_bytes([self.byte(i), self.byte(i + 1)])
    }

    fn be32(&self, i: usize) -> u32 {
        u32::from_be_bytes([self.byte(i), self.byte(i + 1), self.byte(i + 2), self.byte(i + 3)])
    }

    fn be64(&self, i: usize) -> u64 {
        (u64::from(self.be32(i)) << 32) | u64::from(self.be32(i + 4))
    }
}

/// Flags byte of the locking feature descriptor.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LockingFeature(pub u8);

impl LockingFeature {
    pub fn supported(self) -> bool {
        self.0 & OPAL_FEATURE_LOCKING_SUPPORTED != 0
    }
    pub fn enabled(self) -> bool {
        self.0 & OPAL_FEATURE_LOCKING_ENABLED != 0
    }
    pub fn locked(self) -> bool {
        self.0 & OPAL_FEATURE_LOCKED != 0
    }
    pub fn media_encryption(self) -> bool {
        self.0 & OPAL_FEATURE_MEDIA_ENCRYPT != 0
    }
    pub fn mbr_enabled(self) -> bool {
        self.0 & OPAL_FEATURE_MBR_ENABLED != 0
    }
    pub fn mbr_done(self) -> bool {
        self.0 & OPAL_FEATURE_MBR_DONE != 0
    }

    /// Lifecycle state as far as level 0 discovery can tell. A drive that was
    /// initialized and never locked reads the same as one that was unlocked.
    pub fn state(self) -> OpalDeviceState {
        if !self.enabled() {
            OpalDeviceState::Uninitialized
        } else if self.locked() {
            OpalDeviceState::Locked
        } else {
            OpalDeviceState::Unlocked
        }
    }
}

/// A parsed level 0 discovery response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Level0 {
    pub features: Vec<Feature>,
}

impl Level0 {
    /// Walk the feature descriptors of a discovery response.
    ///
    /// A descriptor running past the advertised length ends the walk.
    pub fn parse(buf: &[u8]) -> Result<Self, DiscoveryError> {
        if buf.len() < DISCOVERY_HEADER_LEN {
            return Err(DiscoveryError::TooShort(buf.len()));
        }

        // the length field does not count itself
        let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let end = total_len.saturating_add(4).min(buf.len());

        let mut features = Vec::new();
        let mut off = DISCOVERY_HEADER_LEN;
        while off + DESCRIPTOR_HEADER_LEN <= end {
            let code = u16::from_be_bytes([buf[off], buf[off + 1]]);
            let version = buf[off + 2] >> 4;
            let length = buf[off + 3] as usize;
            let payload = off + DESCRIPTOR_HEADER_LEN;

            debug!("feature descriptor 0x{code:04x}, {length} bytes");

            if payload + length > end {
                break;
            }
            if code == FEATURE_LOCKING && length == 0 {
                return Err(DiscoveryError::EmptyLocking);
            }
            features.push(Feature {
                code,
                version,
                data: buf[payload..payload + length].to_vec(),
            });
            off = payload + length;
        }
        Ok(Level0 { features })
    }

    pub fn find(&self, code: u16) -> Option<&Feature> {
        self.features.iter().find(|f| f.code == code)
    }

    pub fn locking(&self) -> Option<LockingFeature> {
        self.find(FEATURE_LOCKING).map(|f| LockingFeature(f.byte(0)))
    }
}

/// Builds a well-formed discovery response, one descriptor at a time.
#[derive(Clone, Debug)]
pub struct PageBuilder {
    buf: Vec<u8>,
}

impl Default for PageBuilder {
    fn default() -> Self {
        PageBuilder::new()
    }
}

impl PageBuilder {
    pub fn new() -> Self {
        let mut buf = vec![0u8; DISCOVERY_HEADER_LEN];
        // data structure revision
        buf[4..8].copy_from_slice(&1u32.to_be_bytes());
        PageBuilder { buf }
    }

    /// Append one descriptor. The length field is one byte, so `data` past
    /// 255 bytes is dropped.
    pub fn feature(mut self, code: u16, version: u8, data: &[u8]) -> Self {
        let data = &data[..data.len().min(usize::from(u8::MAX))];
        self.buf.extend_from_slice(&code.to_be_bytes());
        self.buf.push(version << 4);
        self.buf.push(data.len() as u8);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let total_len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&total_len.to_be_bytes());
        self.buf
    }
}

/// Point-in-time answer to `discover`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Discovery {
    pub level0: Level0,
    /// `None` when the drive reports no Locking descriptor.
    pub locking: Option<LockingFeature>,
    pub state: OpalDeviceState,
    pub ranges: Vec<LockingRange>,
}

impl Discovery {
    pub fn from_level0(level0: Level0) -> Self {
        let locking = level0.locking();
        let flags = locking.unwrap_or_default();
        let ranges = if flags.supported() {
            vec![LockingRange {
                index: 0,
                read_only: false,
                locked: flags.locked(),
            }]
        } else {
            Vec::new()
        };
        Discovery {
            level0,
            locking,
            state: flags.state(),
            ranges,
        }
    }

    /// Locking flags, all clear when the descriptor is absent.
    pub fn flags(&self) -> LockingFeature {
        self.locking.unwrap_or_default()
    }

    pub fn locking_supported(&self) -> bool {
        self.flags().supported()
    }

    pub fn report(&self, style: DiscoveryStyle) -> Report<'_> {
        Report {
            discovery: self,
            style,
        }
    }
}

pub struct Report<'a> {
    discovery: &'a Discovery,
    style: DiscoveryStyle,
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.discovery;
        if self.style == DiscoveryStyle::Udev {
            let flags = d.flags();
            let enabled = if flags.enabled() { "ENABLED" } else { "DISABLED" };
            let locked = if flags.locked() { "LOCKED" } else { "UNLOCKED" };
            writeln!(f, "DEV_SED_LOCKING={enabled}")?;
            return writeln!(f, "DEV_SED_LOCKED={locked}");
        }

        write_locking(f, d.flags())?;
        writeln!(f, "\tState             : {}", d.state)?;
        writeln!(f, "Locking Ranges:")?;
        for r in &d.ranges {
            writeln!(
                f,
                "\tRange {:<2}          : {}{}",
                r.index,
                if r.locked { "locked" } else { "unlocked" },
                if r.read_only { " (read-only)" } else { "" }
            )?;
        }

        if self.style == DiscoveryStyle::Verbose {
            writeln!(f, "Features:")?;
            for feat in &d.level0.features {
                write_feature(f, feat)?;
            }
        }
        Ok(())
    }
}

fn write_locking(f: &mut fmt::Formatter<'_>, l: LockingFeature) -> fmt::Result {
    writeln!(f, "Locking Features:")?;
    writeln!(f, "\tLocking Supported : {}", yes_no(l.supported()))?;
    writeln!(f, "\tLocking Enabled   : {}", yes_no(l.enabled()))?;
    writeln!(f, "\tLocked            : {}", yes_no(l.locked()))?;
    writeln!(f, "\tMedia Encryption  : {}", yes_no(l.media_encryption()))?;
    writeln!(f, "\tMBR Enabled       : {}", yes_no(l.mbr_enabled()))?;
    writeln!(f, "\tMBR Done          : {}", yes_no(l.mbr_done()))
}

fn write_feature(f: &mut fmt::Formatter<'_>, feat: &Feature) -> fmt::Result {
    writeln!(
        f,
        "\t{} (0x{:04x}, version {})",
        feat.name(),
        feat.code,
        feat.version
    )?;
    match feat.code {
        FEATURE_TPER => {
            let b = feat.byte(0);
            writeln!(f, "\t\tSync Supported        : {}", yes_no(b & 0x01 != 0))?;
            writeln!(f, "\t\tAsync Supported       : {}", yes_no(b & 0x02 != 0))?;
            writeln!(f, "\t\tACK/NAK Supported     : {}", yes_no(b & 0x04 != 0))?;
            writeln!(f, "\t\tBuffer Mgmt Supported : {}", yes_no(b & 0x08 != 0))?;
            writeln!(f, "\t\tStreaming Supported   : {}", yes_no(b & 0x10 != 0))?;
            writeln!(f, "\t\tComID Mgmt Supported  : {}", yes_no(b & 0x40 != 0))
        }
        FEATURE_LOCKING => Ok(()),
        FEATURE_GEOMETRY => {
            writeln!(f, "\t\tAlign Required        : {}", yes_no(feat.byte(0) & 0x01 != 0))?;
            writeln!(f, "\t\tLogical Block Size    : {}", feat.be32(8))?;
            writeln!(f, "\t\tAlignment Granularity : {}", feat.be64(12))?;
            writeln!(f, "\t\tLowest Aligned LBA    : {}", feat.be64(20))
        }
        FEATURE_OPAL_V1 | FEATURE_OPAL_V2 | FEATURE_PYRITE_V1 | FEATURE_PYRITE_V2
        | FEATURE_RUBY => {
            writeln!(f, "\t\tBase ComID            : 0x{:04x}", feat.be16(0))?;
            writeln!(f, "\t\tNumber of ComIDs      : {}", feat.be16(2))?;
            if feat.code == FEATURE_OPAL_V2 || feat.code == FEATURE_RUBY {
                writeln!(f, "\t\tRange Crossing        : {}", yes_no(feat.byte(4) & 0x01 != 0))?;
                writeln!(f, "\t\tLocking Admins        : {}", feat.be16(5))?;
                writeln!(f, "\t\tLocking Users         : {}", feat.be16(7))?;
            }
            Ok(())
        }
        FEATURE_SINGLE_USER_MODE => {
            writeln!(f, "\t\tLocking Objects       : {}", feat.be32(0))
        }
        FEATURE_DATASTORE => {
            writeln!(f, "\t\tMax Tables            : {}", feat.be16(2))?;
            writeln!(f, "\t\tMax Table Size        : {}", feat.be32(4))
        }
        _ => {
            let mut hex = String::new();
            for b in &feat.data {
                let _ = write!(hex, "{b:02x}");
            }
            writeln!(f, "\t\tData                  : {hex}")
        }
    }
}
