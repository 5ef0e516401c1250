//! Authentication material and where it comes from.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use tracing::debug;
use zeroize::Zeroizing;

use crate::channel::KeyMaterial;
use crate::error::ConfigError;
use crate::request::{OperationRequest, Verb};

/// Longest key the kernel interface can carry (`key_len` is one byte).
pub const MAX_SECRET_LEN: usize = u8::MAX as usize;

/// Secret bytes, zeroed when dropped and never printed.
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if bytes.len() > MAX_SECRET_LEN {
            return Err(ConfigError::SecretTooLong {
                max: MAX_SECRET_LEN,
            });
        }
        Ok(Secret(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Secret {}

#[derive(Debug, PartialEq, Eq)]
pub enum Credential {
    /// The owner credential set at initialize time when no password was given.
    DefaultOwner,
    /// A password typed by the operator.
    Interactive(Secret),
    /// Physical Security ID from the drive label. Revert only.
    Psid(Secret),
}

impl Credential {
    pub fn material(&self) -> KeyMaterial<'_> {
        match self {
            Credential::DefaultOwner => KeyMaterial::Keyring,
            Credential::Interactive(s) | Credential::Psid(s) => KeyMaterial::Included(s.as_bytes()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::DefaultOwner => "default",
            Credential::Interactive(_) => "interactive",
            Credential::Psid(_) => "psid",
        }
    }
}

/// Source of secrets typed by the operator.
pub trait SecretPrompt {
    fn read_secret(&mut self, message: &str) -> Result<Secret, ConfigError>;
}

/// Pick the credential for an operation.
pub fn resolve<P: SecretPrompt + ?Sized>(
    prompt: &mut P,
    request: &OperationRequest,
) -> Result<Credential, ConfigError> {
    let credential = if request.use_psid && request.verb == Verb::Revert {
        Credential::Psid(prompt.read_secret("PSID: ")?)
    } else if request.ask_key {
        Credential::Interactive(prompt.read_secret("Password: ")?)
    } else {
        Credential::DefaultOwner
    };
    debug!(verb = %request.verb, credential = credential.kind(), "resolved credential");
    Ok(credential)
}

/// Ask for a new password twice.
pub fn resolve_new<P: SecretPrompt + ?Sized>(prompt: &mut P) -> Result<Credential, ConfigError> {
    let first = prompt.read_secret("New Password: ")?;
    let second = prompt.read_secret("Re-enter New Password: ")?;
    if first != second {
        return Err(ConfigError::SecretMismatch);
    }
    Ok(Credential::Interactive(first))
}

/// Prompts on the controlling terminal with echo turned off.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

/// Restores the terminal settings on every exit path.
struct EchoGuard<'a> {
    tty: &'a File,
    saved: Termios,
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.tty, SetArg::TCSANOW, &self.saved);
    }
}

impl SecretPrompt for TerminalPrompt {
    fn read_secret(&mut self, message: &str) -> Result<Secret, ConfigError> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .map_err(ConfigError::Prompt)?;

        let saved = termios::tcgetattr(&tty).map_err(|e| ConfigError::Prompt(e.into()))?;
        let mut silent = saved.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        termios::tcsetattr(&tty, SetArg::TCSANOW, &silent)
            .map_err(|e| ConfigError::Prompt(e.into()))?;
        let _guard = EchoGuard { tty: &tty, saved };

        (&tty)
            .write_all(message.as_bytes())
            .and_then(|_| (&tty).flush())
            .map_err(ConfigError::Prompt)?;

        // byte at a time into a buffer that never reallocates, so no unzeroed
        // copy of the secret is left behind
        let mut line = Zeroizing::new(Vec::with_capacity(MAX_SECRET_LEN + 1));
        let mut byte = [0u8; 1];
        loop {
            match (&tty).read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) if line.len() <= MAX_SECRET_LEN => line.push(byte[0]),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConfigError::Prompt(e)),
            }
        }
        byte[0] = 0;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Secret::new(std::mem::take(&mut *line))
    }
}

/// Answers prompts from a fixed list. Records every prompt it was shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedPrompt {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn read_secret(&mut self, message: &str) -> Result<Secret, ConfigError> {
        self.asked.push(message.to_string());
        let answer = self.answers.pop_front().ok_or_else(|| {
            ConfigError::Prompt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no scripted answer left",
            ))
        })?;
        Secret::new(answer.into_bytes())
    }
}
