//! # eid-auth
//!
//! A Rust library for **challenge-response authentication of eID smartcard holders**.
//! The holder proves possession of the private key behind their authentication
//! certificate by signing a fresh random challenge with a PIN-protected token; the
//! signature is verified locally and the certificate's revocation status is
//! confirmed with an OCSP responder before the holder is accepted.
//!
//! ## Features
//!
//! - **Certificate Selection** - Picks the authentication certificate by its digital-signature key usage
//! - **Secure Challenge Generation** - Digest-sized challenges from the operating system's CSPRNG
//! - **PIN Handling** - Scoped PIN buffers wiped on every path, re-prompts with remaining-attempt hints
//! - **RSA PKCS#1 v1.5 Verification** - Offline check against the certificate's public key
//! - **Fail-Closed OCSP** - Only a fresh `good` answer signed by the trusted responder lets a session succeed
//! - **Cause Chains** - Every failure carries its stage and underlying causes, and maps to its own exit code
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eid_auth::{AuthConfig, AuthContext, Authenticator, ConsolePinSource, SoftToken};
//! use std::path::Path;
//!
//! let config = AuthConfig::load(Path::new("eid-auth.toml"))?;
//! let token = SoftToken::from_files(
//!     "software token",
//!     Path::new("keys/auth.key"),
//!     &["certs/auth.pem", "certs/sign.pem"],
//! )?;
//!
//! let context = AuthContext::init(config)?;
//! let outcome = Authenticator::new(&context, ConsolePinSource).authenticate(token);
//!
//! match outcome.into_result() {
//!     Ok(response) => println!("Successfully authenticated {}.", response.subject),
//!     Err(e) => eprintln!("{}", e.trace()),
//! }
//! # Ok::<(), eid_auth::AuthError>(())
//! ```
//!
//! ## Command Line
//!
//! The `eid-auth` binary runs one session against the software token named in
//! its configuration file and exits with the failure category's code:
//!
//! ```bash
//! EID_AUTH_LOG=eid_auth=debug eid-auth --config eid-auth.toml
//! ```

pub mod auth;
pub mod certificate;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod ocsp;
pub mod pin;
pub mod selection;
pub mod signer;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types for easier access
pub use auth::{
    AuthResponse, Authenticator, ConsoleTranscript, NoTranscript, SessionOutcome, SessionState,
    Transcript,
};
pub use certificate::{Certificate, KeyUsage, PersonalIdentity};
pub use crate::config::{AuthConfig, OcspConfig, TokenConfig};
pub use context::AuthContext;
pub use crypto::{generate_challenge, verify_signature, Challenge, DigestAlgorithm, Signature};
pub use error::{AuthError, ErrorKind, Result, Stage};
pub use ocsp::{HttpTransport, OcspTransport, RevocationChecker, RevocationVerdict};
pub use pin::{ConsolePinSource, PinBuffer, PinSource, SecretPinSource};
pub use selection::{
    select_authentication_certificate, CertificateSelectionPolicy, DigitalSignaturePolicy,
};
pub use signer::TokenSigner;
pub use token::{Credential, SoftToken, Token, TokenFailure};
