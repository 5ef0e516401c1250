use std::fs::File;
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::{Request, Response, SecurityChannel};
use crate::error::{ConfigError, Result};
use crate::ioctl::IoctlChannel;

/// What opening a path produced.
pub enum Opened<C> {
    Block(C),
    /// The path exists but is not a block device. Nothing is held open.
    NotBlock,
}

/// Knows how to open a device path and connect a channel to it.
pub trait DeviceProvider {
    type Channel: SecurityChannel;

    fn open(&self, path: &Path) -> io::Result<Opened<Self::Channel>>;
}

/// Real block devices under `/dev`, driven through the sed-opal ioctls.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockDevices;

impl DeviceProvider for BlockDevices {
    type Channel = IoctlChannel;

    fn open(&self, path: &Path) -> io::Result<Opened<IoctlChannel>> {
        // O_NONBLOCK keeps a FIFO from stalling the open before it is refused
        let file = File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        // checked on the open handle, not the path
        if !file.metadata()?.file_type().is_block_device() {
            return Ok(Opened::NotBlock);
        }
        Ok(Opened::Block(IoctlChannel::new(file)))
    }
}

/// An open device. The underlying handle is released when this is dropped.
pub struct Device<C: SecurityChannel> {
    path: PathBuf,
    channel: C,
}

impl<C: SecurityChannel> Device<C> {
    /// Open `path`, refusing anything that is not a block device before a
    /// channel is connected.
    pub fn open<D>(provider: &D, path: &Path) -> Result<Self>
    where
        D: DeviceProvider<Channel = C>,
    {
        let opened = provider.open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let channel = match opened {
            Opened::Block(channel) => channel,
            Opened::NotBlock => {
                return Err(ConfigError::NotABlockDevice(path.to_path_buf()).into());
            }
        };
        debug!(device = %path.display(), "opened");
        Ok(Device {
            path: path.to_path_buf(),
            channel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn exchange(&mut self, request: &Request<'_>) -> Response {
        self.channel.exchange(request)
    }
}

impl<C: SecurityChannel> Drop for Device<C> {
    fn drop(&mut self) {
        debug!(device = %self.path.display(), "released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_real(path: &Path) -> Result<Device<IoctlChannel>> {
        Device::open(&BlockDevices, path)
    }

    #[test]
    fn regular_file_is_refused_after_open() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            BlockDevices.open(file.path()),
            Ok(Opened::NotBlock)
        ));
        assert!(matches!(
            open_real(file.path()),
            Err(crate::SedError::Config(ConfigError::NotABlockDevice(_)))
        ));
    }

    #[test]
    fn character_device_is_refused() {
        assert!(matches!(
            open_real(Path::new("/dev/null")),
            Err(crate::SedError::Config(ConfigError::NotABlockDevice(_)))
        ));
    }

    #[test]
    fn missing_path_is_an_open_error() {
        assert!(matches!(
            open_real(Path::new("/dev/no-such-device")),
            Err(crate::SedError::Config(ConfigError::Open { .. }))
        ));
    }
}
