use crate::{
    certificate::Certificate,
    error::{AuthError, ErrorKind, Result},
};

/// Picks the certificate a session authenticates with
///
/// Implementations receive the token's certificates in enumeration order
/// and must return exactly one of them or fail with `NoUsableCertificate`.
pub trait CertificateSelectionPolicy {
    fn select(&self, candidates: Vec<Certificate>) -> Result<Certificate>;
}

/// Selects the first certificate with the digital-signature key usage bit
///
/// An eID card carries a non-repudiation certificate for legally binding
/// document signatures next to the authentication certificate. Only the
/// certificate with bit 0 (digitalSignature) set is used for a login
/// challenge. Certificates without a key usage extension are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigitalSignaturePolicy;

impl CertificateSelectionPolicy for DigitalSignaturePolicy {
    fn select(&self, candidates: Vec<Certificate>) -> Result<Certificate> {
        select_authentication_certificate(candidates)
    }
}

/// Select the authentication certificate from a token's certificates
///
/// # Errors
/// - `NoUsableCertificate` - The list is empty or no certificate has the
///   digital-signature bit set
pub fn select_authentication_certificate(candidates: Vec<Certificate>) -> Result<Certificate> {
    if candidates.is_empty() {
        return Err(AuthError::new(
            ErrorKind::NoUsableCertificate,
            "token holds no certificates",
        ));
    }

    let count = candidates.len();
    for certificate in candidates {
        match certificate.key_usage() {
            Some(usage) if usage.digital_signature() => {
                tracing::debug!(
                    serial = %certificate.serial_hex(),
                    subject = %certificate.subject(),
                    "selected authentication certificate"
                );
                return Ok(certificate);
            }
            Some(_) => {
                tracing::trace!(serial = %certificate.serial_hex(), "digital signature bit not set");
            }
            None => {
                tracing::trace!(serial = %certificate.serial_hex(), "no key usage extension");
            }
        }
    }

    Err(AuthError::new(
        ErrorKind::NoUsableCertificate,
        format!("none of {count} certificates has the digital signature key usage"),
    ))
}
