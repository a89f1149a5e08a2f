//! PIN sources and the fixed-size buffer a PIN lives in while it is used.

use crate::error::{AuthError, ErrorKind, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Longest PIN accepted, in bytes
pub const PIN_CAPACITY: usize = 16;

/// Fixed-capacity PIN storage, zeroed by [`PinBuffer::wipe`] and on drop
///
/// The buffer never reallocates, so no stale copies of the PIN are left
/// behind in freed heap memory.
pub struct PinBuffer {
    bytes: [u8; PIN_CAPACITY],
    len: usize,
}

impl PinBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0u8; PIN_CAPACITY],
            len: 0,
        }
    }

    /// Replace the buffer contents
    ///
    /// # Errors
    /// - `Io` - The input is longer than [`PIN_CAPACITY`]; the buffer is left wiped
    pub fn set(&mut self, pin: &[u8]) -> Result<()> {
        self.wipe();
        if pin.len() > PIN_CAPACITY {
            return Err(AuthError::new(
                ErrorKind::Io,
                format!("PIN input exceeds {PIN_CAPACITY} characters"),
            ));
        }
        self.bytes[..pin.len()].copy_from_slice(pin);
        self.len = pin.len();
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn wipe(&mut self) {
        self.bytes.zeroize();
        self.len = 0;
    }

    /// Whole backing storage, including bytes past `len`
    #[cfg(test)]
    pub(crate) fn raw(&self) -> &[u8; PIN_CAPACITY] {
        &self.bytes
    }
}

impl Default for PinBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PinBuffer {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl fmt::Debug for PinBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinBuffer([REDACTED])")
    }
}

/// What the holder is being asked to unlock
#[derive(Clone, Debug)]
pub struct PinRequest<'a> {
    pub token_label: &'a str,
    pub certificate_subject: &'a str,
    /// 1 for the first prompt of a session
    pub attempt: u8,
    /// Attempts left as reported by the token after the previous rejection
    pub remaining_attempts: Option<u8>,
}

/// Supplies the PIN for a sign operation
///
/// Leaving the buffer empty cancels the session.
pub trait PinSource {
    fn read_pin(&mut self, request: &PinRequest<'_>, buffer: &mut PinBuffer) -> Result<()>;

    /// Whether a rejected PIN may be followed by another prompt
    fn retry_allowed(&self) -> bool {
        true
    }
}

/// Interactive PIN prompt on the controlling terminal, without echo
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsolePinSource;

impl PinSource for ConsolePinSource {
    fn read_pin(&mut self, request: &PinRequest<'_>, buffer: &mut PinBuffer) -> Result<()> {
        if request.attempt == 1 {
            eprintln!("Selected token {}.", request.token_label);
        } else {
            match request.remaining_attempts {
                Some(n) => eprintln!("Incorrect PIN, {n} attempts remaining."),
                None => eprintln!("Incorrect PIN."),
            }
        }

        let input = Zeroizing::new(
            rpassword::prompt_password("Enter PIN or leave blank to cancel: ").map_err(|e| {
                AuthError::new(ErrorKind::Io, format!("cannot read PIN from terminal: {e}"))
            })?,
        );
        buffer.set(input.trim_end_matches(['\r', '\n']).as_bytes())
    }
}

/// Non-interactive PIN supplied up front, e.g. from the environment
///
/// Submitted once per session: a rejected PIN is never retried, so a stale
/// value cannot run the token's retry counter down.
pub struct SecretPinSource {
    pin: SecretString,
}

impl SecretPinSource {
    pub fn new(pin: SecretString) -> Self {
        Self { pin }
    }

    /// Read the PIN from an environment variable
    ///
    /// # Errors
    /// - `Config` - The variable is unset or not valid UTF-8
    pub fn from_env(var: &str) -> Result<Self> {
        let value = std::env::var(var).map_err(|e| {
            AuthError::new(ErrorKind::Config, format!("PIN variable {var}: {e}"))
        })?;
        Ok(Self::new(SecretString::new(value)))
    }
}

impl fmt::Debug for SecretPinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretPinSource([REDACTED])")
    }
}

impl PinSource for SecretPinSource {
    fn read_pin(&mut self, _request: &PinRequest<'_>, buffer: &mut PinBuffer) -> Result<()> {
        buffer.set(self.pin.expose_secret().as_bytes())
    }

    fn retry_allowed(&self) -> bool {
        false
    }
}
