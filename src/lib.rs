//! sed-opal library entry point.
//!
//! A request flows through the crate in one direction: the
//! [`OperationRequest`] is validated, the [`Device`] is opened through a
//! [`DeviceProvider`], the [`Controller`] runs the verb over the device's
//! [`SecurityChannel`], and the [`status`] module classifies whatever comes
//! back. The device is released when [`run`] returns, on every path.

pub mod args;
pub mod channel;
pub mod credential;
pub mod device;
pub mod discovery;
pub mod error;
pub mod ioctl;
pub mod opal;
pub mod request;
pub mod sim;
pub mod status;

use std::path::Path;

use tracing::warn;

pub use channel::{KeyMaterial, LockState, Request, Response, SecurityChannel};
pub use credential::{Credential, ScriptedPrompt, Secret, SecretPrompt, TerminalPrompt};
pub use device::{BlockDevices, Device, DeviceProvider, Opened};
pub use discovery::Discovery;
pub use error::{ConfigError, ErrorKind, Result, SedError};
pub use opal::{Controller, LockingRange, OpalDeviceState};
pub use request::{DiscoveryStyle, OperationRequest, RevertMode, Verb};

/// What a successful invocation produced.
#[derive(Debug)]
pub enum Outcome {
    Discovered(Discovery),
    Completed,
}

/// Run one request against the device at `path`.
pub fn run<D, P>(
    provider: &D,
    prompt: &mut P,
    path: &Path,
    request: &OperationRequest,
) -> Result<Outcome>
where
    D: DeviceProvider,
    P: SecretPrompt + ?Sized,
{
    request.validate()?;

    let mut device = Device::open(provider, path)?;
    let mut controller = Controller::new(prompt);

    let result = match request.verb {
        Verb::Discover => controller
            .discover(&mut device, request)
            .map(Outcome::Discovered),
        Verb::Initialize => controller.initialize(&mut device, request).map(|_| Outcome::Completed),
        Verb::Lock => controller.lock(&mut device, request).map(|_| Outcome::Completed),
        Verb::Unlock => controller.unlock(&mut device, request).map(|_| Outcome::Completed),
        Verb::Revert => controller.revert(&mut device, request).map(|_| Outcome::Completed),
        Verb::Password => controller.password(&mut device, request).map(|_| Outcome::Completed),
    };

    if let Err(e) = &result {
        if status::severity(request.verb, e) == status::Severity::Informational {
            warn!(device = %path.display(), verb = %request.verb, "{e}");
        }
    }
    result
}
