use crate::error::{AuthError, ErrorKind, Result};
use base64::prelude::*;
use der::oid::{AssociatedOid, ObjectIdentifier};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::{fmt, str::FromStr};

/// Digest algorithm a challenge is declared to be a hash of
///
/// The challenge is never actually hashed: the random bytes stand in for a
/// digest of this algorithm, and the token signs them wrapped in the
/// algorithm's PKCS#1 v1.5 `DigestInfo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl DigestAlgorithm {
    /// Digest size in bytes
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha256 => Sha256::OID,
            DigestAlgorithm::Sha384 => Sha384::OID,
            DigestAlgorithm::Sha512 => Sha512::OID,
        }
    }

    /// PKCS#1 v1.5 signature scheme binding this digest algorithm
    pub fn pkcs1v15(&self) -> Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(AuthError::new(
                ErrorKind::Config,
                format!("unsupported digest algorithm '{other}'"),
            )),
        }
    }
}

/// A fresh random challenge tagged with its digest algorithm
///
/// Deliberately not `Clone`: a challenge belongs to exactly one session.
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl Challenge {
    /// Wrap existing bytes as a challenge
    ///
    /// # Errors
    /// - `Protocol` - The length does not match the algorithm's digest size
    pub fn new(algorithm: DigestAlgorithm, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != algorithm.output_len() {
            return Err(AuthError::new(
                ErrorKind::Protocol,
                format!(
                    "challenge is {} bytes, {} requires {}",
                    bytes.len(),
                    algorithm,
                    algorithm.output_len()
                ),
            ));
        }
        Ok(Self { algorithm, bytes })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }
}

/// Generate a cryptographically secure random challenge
///
/// Draws exactly `algorithm.output_len()` bytes from the operating system's
/// random source.
///
/// # Errors
/// - `Entropy` - The operating system could not supply random bytes
///
/// # Example
/// ```rust
/// use eid_auth::crypto::challenge::{generate_challenge, DigestAlgorithm};
///
/// let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
/// assert_eq!(challenge.as_bytes().len(), 64);
/// ```
pub fn generate_challenge(algorithm: DigestAlgorithm) -> Result<Challenge> {
    generate_challenge_with(&mut OsRng, algorithm)
}

/// Generate a challenge from a caller-supplied cryptographic RNG
pub fn generate_challenge_with<R>(rng: &mut R, algorithm: DigestAlgorithm) -> Result<Challenge>
where
    R: RngCore + CryptoRng,
{
    let mut bytes = vec![0u8; algorithm.output_len()];
    rng.try_fill_bytes(&mut bytes).map_err(|e| {
        AuthError::new(
            ErrorKind::Entropy,
            format!("random source could not supply {} bytes: {}", bytes.len(), e),
        )
    })?;
    Challenge::new(algorithm, bytes)
}
