//! Token capability: anything that can enumerate certificates and sign
//! with a PIN-protected private key that never leaves it.

pub mod soft;

pub use soft::SoftToken;

use crate::{certificate::Certificate, crypto::challenge::DigestAlgorithm, error::Result};
use thiserror::Error;

/// Failure reported by a token's sign operation
///
/// Messages must never include the PIN that was presented.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenFailure {
    /// The token rejected the PIN
    #[error("token rejected the PIN")]
    PinIncorrect { remaining_attempts: Option<u8> },

    /// The PIN is blocked and no further attempts are accepted
    #[error("PIN is blocked")]
    PinLocked,

    /// Communication or hardware failure
    #[error("device failure: {0}")]
    Device(String),
}

/// Hardware or software key store
///
/// A token is exclusively owned by one session at a time, hence `&mut self`
/// on every operation.
pub trait Token {
    /// Human-readable token label shown in PIN prompts
    fn label(&self) -> &str;

    /// Certificates on the token in enumeration order
    fn enumerate_certificates(&mut self) -> Result<Vec<Certificate>>;

    /// Sign `digest` with the private key bound to `certificate`
    ///
    /// `digest` is treated as an already computed hash of `algorithm` and is
    /// wrapped in the matching PKCS#1 v1.5 `DigestInfo` by the token.
    fn sign_with(
        &mut self,
        certificate: &Certificate,
        pin: &[u8],
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> std::result::Result<Vec<u8>, TokenFailure>;

    /// Close the token session and drop any cached key handles
    fn release(&mut self) {}
}

/// A token session owned by one authentication attempt
///
/// The token is released when the credential is dropped, whichever way the
/// session ends.
pub struct Credential<T: Token> {
    token: T,
    released: bool,
}

impl<T: Token> Credential<T> {
    pub fn acquire(token: T) -> Self {
        tracing::debug!(token = %token.label(), "token session opened");
        Self {
            token,
            released: false,
        }
    }

    pub fn label(&self) -> &str {
        self.token.label()
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    /// Release the token now instead of waiting for drop
    pub fn release(&mut self) {
        if !self.released {
            self.token.release();
            self.released = true;
            tracing::debug!(token = %self.token.label(), "token session released");
        }
    }
}

impl<T: Token> Drop for Credential<T> {
    fn drop(&mut self) {
        self.release();
    }
}
