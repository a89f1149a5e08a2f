use crate::{
    certificate::Certificate,
    crypto::challenge::{Challenge, DigestAlgorithm},
    error::{AuthError, ErrorKind, Result},
};
use base64::prelude::*;
use rsa::traits::PublicKeyParts;

/// Signature produced by a token over a challenge, tagged with the digest
/// algorithm the token was told the challenge belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl Signature {
    pub fn new(algorithm: DigestAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }
}

/// Verify an RSA PKCS#1 v1.5 signature over a challenge
///
/// The challenge bytes are treated as an already computed digest of the
/// challenge's algorithm. Verification is purely local.
///
/// # Arguments
/// * `challenge` - The challenge that was sent to the token
/// * `signature` - The token's signature over the challenge
/// * `certificate` - Certificate holding the public key of the signing key
///
/// # Errors
/// - `SignatureInvalid` - Algorithm tags differ or the signature does not verify
/// - `UnsupportedKeyType` - The certificate key is not RSA
/// - `Protocol` - The signature length differs from the key modulus size
///
/// # Example
/// ```rust,no_run
/// use eid_auth::{verify_signature, Certificate, Challenge, DigestAlgorithm, Signature};
///
/// # fn run(challenge: Challenge, signature: Signature, cert: Certificate) {
/// match verify_signature(&challenge, &signature, &cert) {
///     Ok(()) => println!("holder controls the key"),
///     Err(e) => println!("verification failed: {}", e),
/// }
/// # }
/// ```
pub fn verify_signature(
    challenge: &Challenge,
    signature: &Signature,
    certificate: &Certificate,
) -> Result<()> {
    if signature.algorithm() != challenge.algorithm() {
        return Err(AuthError::new(
            ErrorKind::SignatureInvalid,
            format!(
                "signature is tagged {} but the challenge is {}",
                signature.algorithm(),
                challenge.algorithm()
            ),
        ));
    }

    let key = certificate.rsa_public_key()?;
    if signature.len() != key.size() {
        return Err(AuthError::new(
            ErrorKind::Protocol,
            format!(
                "signature is {} bytes, key modulus is {} bytes",
                signature.len(),
                key.size()
            ),
        ));
    }

    key.verify(
        challenge.algorithm().pkcs1v15(),
        challenge.as_bytes(),
        signature.as_bytes(),
    )
    .map_err(|e| {
        AuthError::new(
            ErrorKind::SignatureInvalid,
            format!(
                "signature does not verify against certificate {}: {}",
                certificate.serial_hex(),
                e
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::challenge::generate_challenge, testutil};

    fn signed_challenge(algorithm: DigestAlgorithm) -> (Challenge, Signature) {
        let challenge = generate_challenge(algorithm).unwrap();
        let bytes = testutil::holder_key()
            .sign(algorithm.pkcs1v15(), challenge.as_bytes())
            .unwrap();
        (challenge, Signature::new(algorithm, bytes))
    }

    #[test]
    fn test_valid_signature_verifies() {
        let cert = testutil::holder_auth_cert();
        for algorithm in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            let (challenge, signature) = signed_challenge(algorithm);
            assert!(verify_signature(&challenge, &signature, &cert).is_ok());
        }
    }

    #[test]
    fn test_any_signature_bit_flip_fails() {
        let cert = testutil::holder_auth_cert();
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);

        for bit in 0..signature.len() * 8 {
            let mut bytes = signature.as_bytes().to_vec();
            bytes[bit / 8] ^= 0x80 >> (bit % 8);
            let tampered = Signature::new(signature.algorithm(), bytes);
            let result = verify_signature(&challenge, &tampered, &cert);
            assert_eq!(result.unwrap_err().kind(), ErrorKind::SignatureInvalid, "bit {bit}");
        }
    }

    #[test]
    fn test_any_challenge_bit_flip_fails() {
        let cert = testutil::holder_auth_cert();
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);

        for bit in 0..challenge.as_bytes().len() * 8 {
            let mut bytes = challenge.as_bytes().to_vec();
            bytes[bit / 8] ^= 0x80 >> (bit % 8);
            let tampered = Challenge::new(challenge.algorithm(), bytes).unwrap();
            let result = verify_signature(&tampered, &signature, &cert);
            assert_eq!(result.unwrap_err().kind(), ErrorKind::SignatureInvalid, "bit {bit}");
        }
    }

    #[test]
    fn test_wrong_algorithm_tag_fails() {
        let cert = testutil::holder_auth_cert();
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);

        // same bytes, different declared algorithm
        let relabelled = Signature::new(DigestAlgorithm::Sha256, signature.as_bytes().to_vec());
        let result = verify_signature(&challenge, &relabelled, &cert);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::SignatureInvalid);
    }

    #[test]
    fn test_signature_under_other_digest_info_fails() {
        let cert = testutil::holder_auth_cert();
        let challenge = generate_challenge(DigestAlgorithm::Sha256).unwrap();
        // signed under a SHA-384 DigestInfo prefix with a 32 byte body
        let mut scheme = DigestAlgorithm::Sha384.pkcs1v15();
        scheme.hash_len = Some(32);
        let bytes = testutil::holder_key().sign(scheme, challenge.as_bytes()).unwrap();
        let signature = Signature::new(DigestAlgorithm::Sha256, bytes);

        let result = verify_signature(&challenge, &signature, &cert);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::SignatureInvalid);
    }

    #[test]
    fn test_wrong_certificate_fails() {
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);
        let result = verify_signature(&challenge, &signature, &testutil::responder_cert());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::SignatureInvalid);
    }

    #[test]
    fn test_ec_certificate_is_unsupported() {
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);
        let result = verify_signature(&challenge, &signature, &testutil::ec_auth_cert());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnsupportedKeyType);
    }

    #[test]
    fn test_truncated_signature_is_protocol_error() {
        let cert = testutil::holder_auth_cert();
        let (challenge, signature) = signed_challenge(DigestAlgorithm::Sha512);
        let truncated = Signature::new(
            signature.algorithm(),
            signature.as_bytes()[..signature.len() - 1].to_vec(),
        );
        let result = verify_signature(&challenge, &truncated, &cert);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Protocol);
    }
}
