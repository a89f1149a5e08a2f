use crate::{
    certificate::Certificate,
    crypto::{challenge::Challenge, signature::Signature},
    error::{AuthError, ErrorKind, Result},
    pin::{PinBuffer, PinRequest, PinSource},
    token::{Credential, Token, TokenFailure},
};

/// Default number of PIN prompts within one signing operation
pub const DEFAULT_PIN_ATTEMPTS: u8 = 3;

/// Wipes the PIN buffer when it goes out of scope
struct Scrubbed<'a>(&'a mut PinBuffer);

impl Drop for Scrubbed<'_> {
    fn drop(&mut self) {
        self.0.wipe();
    }
}

/// Obtains a PIN and has the token sign a challenge
///
/// The PIN only ever lives in a [`PinBuffer`] which is wiped before the
/// token's answer is interpreted, on success and on every error path.
/// Rejected PINs are re-prompted within the signer as long as the token
/// reports attempts left, the PIN source allows it and the configured number
/// of prompts is not used up.
pub struct TokenSigner<P: PinSource> {
    pin_source: P,
    max_attempts: u8,
}

impl<P: PinSource> TokenSigner<P> {
    pub fn new(pin_source: P) -> Self {
        Self {
            pin_source,
            max_attempts: DEFAULT_PIN_ATTEMPTS,
        }
    }

    /// Limit the number of PIN prompts per signing operation (at least one)
    pub fn with_max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn pin_source(&self) -> &P {
        &self.pin_source
    }

    /// Sign the challenge with the key behind `certificate`
    ///
    /// # Arguments
    /// * `challenge` - Fresh challenge to sign
    /// * `credential` - Token session owned by the current authentication
    /// * `certificate` - Selected authentication certificate
    ///
    /// # Returns
    /// * `Ok(Signature)` - Complete signature tagged with the challenge's algorithm
    /// * `Err(AuthError)` - No signature was produced
    ///
    /// # Errors
    /// - `PinCancelled` - The holder entered an empty PIN
    /// - `PinIncorrect` - The token rejected the PIN and no retry is possible
    /// - `Token` - The token failed or returned an empty signature
    /// - `Io` - The PIN could not be read
    pub fn sign<T: Token>(
        &mut self,
        challenge: &Challenge,
        credential: &mut Credential<T>,
        certificate: &Certificate,
    ) -> Result<Signature> {
        let mut buffer = PinBuffer::new();
        self.sign_with_buffer(challenge, credential, certificate, &mut buffer)
    }

    pub(crate) fn sign_with_buffer<T: Token>(
        &mut self,
        challenge: &Challenge,
        credential: &mut Credential<T>,
        certificate: &Certificate,
        buffer: &mut PinBuffer,
    ) -> Result<Signature> {
        let subject = certificate.subject();
        let mut remaining_attempts = None;

        for attempt in 1..=self.max_attempts {
            let request = PinRequest {
                token_label: credential.label(),
                certificate_subject: &subject,
                attempt,
                remaining_attempts,
            };

            let outcome = {
                let pin = Scrubbed(&mut *buffer);
                self.pin_source.read_pin(&request, &mut *pin.0)?;
                if pin.0.is_empty() {
                    return Err(AuthError::new(
                        ErrorKind::PinCancelled,
                        "empty PIN entered, signing cancelled",
                    ));
                }
                credential.token_mut().sign_with(
                    certificate,
                    pin.0.as_bytes(),
                    challenge.algorithm(),
                    challenge.as_bytes(),
                )
            };

            match outcome {
                Ok(bytes) if bytes.is_empty() => {
                    return Err(AuthError::new(
                        ErrorKind::Token,
                        "token returned an empty signature",
                    ));
                }
                Ok(bytes) => {
                    tracing::debug!(attempt, length = bytes.len(), "challenge signed");
                    return Ok(Signature::new(challenge.algorithm(), bytes));
                }
                Err(TokenFailure::PinIncorrect {
                    remaining_attempts: remaining,
                }) => {
                    tracing::warn!(attempt, remaining = ?remaining, "token rejected the PIN");
                    let exhausted = remaining == Some(0)
                        || attempt == self.max_attempts
                        || !self.pin_source.retry_allowed();
                    if exhausted {
                        return Err(pin_incorrect(remaining));
                    }
                    remaining_attempts = remaining;
                }
                Err(TokenFailure::PinLocked) => {
                    return Err(AuthError::new(
                        ErrorKind::PinIncorrect {
                            remaining_attempts: Some(0),
                        },
                        TokenFailure::PinLocked.to_string(),
                    ));
                }
                Err(failure @ TokenFailure::Device(_)) => {
                    return Err(AuthError::new(ErrorKind::Token, failure.to_string()));
                }
            }
        }

        Err(pin_incorrect(remaining_attempts))
    }
}

fn pin_incorrect(remaining_attempts: Option<u8>) -> AuthError {
    AuthError::new(
        ErrorKind::PinIncorrect { remaining_attempts },
        "token rejected the PIN",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{
            challenge::{generate_challenge, DigestAlgorithm},
            signature::verify_signature,
        },
        pin::{SecretPinSource, PIN_CAPACITY},
        testutil::{self, ScriptedPins, TestToken},
    };
    use secrecy::SecretString;

    fn credential() -> Credential<TestToken> {
        Credential::acquire(TestToken::holder())
    }

    #[test]
    fn test_sign_produces_verifiable_signature() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let cert = testutil::holder_auth_cert();
        let mut credential = credential();
        let mut signer = TokenSigner::new(ScriptedPins::new([testutil::HOLDER_PIN]));

        let signature = signer.sign(&challenge, &mut credential, &cert).unwrap();
        assert_eq!(signature.algorithm(), DigestAlgorithm::Sha512);
        assert!(verify_signature(&challenge, &signature, &cert).is_ok());
    }

    #[test]
    fn test_empty_pin_cancels_without_touching_token() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let log = credential.token().log();
        let mut signer = TokenSigner::new(ScriptedPins::new([""]));

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PinCancelled);
        assert_eq!(log.sign_calls(), 0);
    }

    #[test]
    fn test_buffer_is_zeroed_after_success() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let log = credential.token().log();
        let mut signer = TokenSigner::new(ScriptedPins::new([testutil::HOLDER_PIN]));
        let mut buffer = PinBuffer::new();

        signer
            .sign_with_buffer(&challenge, &mut credential, &testutil::holder_auth_cert(), &mut buffer)
            .unwrap();

        // the token saw the PIN, the buffer no longer holds it, the token is still open
        assert_eq!(log.pins_seen(), vec![testutil::HOLDER_PIN.as_bytes().to_vec()]);
        assert_eq!(buffer.raw(), &[0u8; PIN_CAPACITY]);
        assert!(!log.released());
    }

    #[test]
    fn test_buffer_is_zeroed_after_rejection() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let mut signer =
            TokenSigner::new(ScriptedPins::new(["1111", "2222"])).with_max_attempts(2);
        let mut buffer = PinBuffer::new();

        let err = signer
            .sign_with_buffer(&challenge, &mut credential, &testutil::holder_auth_cert(), &mut buffer)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PinIncorrect { .. }));
        assert_eq!(buffer.raw(), &[0u8; PIN_CAPACITY]);
    }

    #[test]
    fn test_wrong_then_right_pin_reprompts() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let log = credential.token().log();
        let pins = ScriptedPins::new(["1111", testutil::HOLDER_PIN]);
        let requests = pins.requests();
        let mut signer = TokenSigner::new(pins);

        assert!(signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .is_ok());
        assert_eq!(log.sign_calls(), 2);
        assert_eq!(requests.borrow().as_slice(), &[(1, None), (2, Some(2))]);
    }

    #[test]
    fn test_remaining_attempts_surface_in_error() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let mut signer = TokenSigner::new(ScriptedPins::new(["1111"])).with_max_attempts(1);

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::PinIncorrect {
                remaining_attempts: Some(2)
            }
        );
        assert!(!err.trace().contains("1111"));
    }

    #[test]
    fn test_secret_pin_is_not_resubmitted() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = credential();
        let log = credential.token().log();
        let mut signer = TokenSigner::new(SecretPinSource::new(SecretString::new(
            "9999".to_string(),
        )));

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PinIncorrect { .. }));
        assert_eq!(log.sign_calls(), 1);
    }

    #[test]
    fn test_locked_token_reports_zero_remaining() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = Credential::acquire(TestToken::holder().locked());
        let mut signer = TokenSigner::new(ScriptedPins::new([testutil::HOLDER_PIN]));

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::PinIncorrect {
                remaining_attempts: Some(0)
            }
        );
    }

    #[test]
    fn test_device_failure_is_token_error() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = Credential::acquire(TestToken::holder().failing("card removed"));
        let mut signer = TokenSigner::new(ScriptedPins::new([testutil::HOLDER_PIN]));

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Token);
        assert!(err.message().contains("card removed"));
    }

    #[test]
    fn test_empty_signature_is_token_error() {
        let challenge = generate_challenge(DigestAlgorithm::Sha512).unwrap();
        let mut credential = Credential::acquire(TestToken::holder().returning_empty());
        let mut signer = TokenSigner::new(ScriptedPins::new([testutil::HOLDER_PIN]));

        let err = signer
            .sign(&challenge, &mut credential, &testutil::holder_auth_cert())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Token);
    }
}
