//! Fixtures and scripted collaborators shared by the unit tests.

use crate::{
    certificate::Certificate,
    config::{AuthConfig, OcspConfig},
    context::AuthContext,
    crypto::challenge::DigestAlgorithm,
    error::{AuthError, ErrorKind, Result},
    ocsp::{
        asn1::{
            BasicOcspResponse, CertStatus, OcspRequest, OcspResponse, OcspResponseStatus,
            ResponderId, ResponseBytes, ResponseData, RevokedInfo, SingleResponse,
        },
        OcspTransport,
    },
    pin::{PinBuffer, PinRequest, PinSource},
    token::{SoftToken, Token, TokenFailure},
};
use chrono::{DateTime, Duration, Utc};
use der::{
    asn1::{BitString, GeneralizedTime, Null, OctetString},
    oid::db::{rfc5912, rfc6960},
    Any, Decode, Encode,
};
use rsa::{pkcs8::DecodePrivateKey, Pkcs1v15Sign, RsaPrivateKey};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};
use x509_cert::{
    ext::{pkix::CrlReason, Extension},
    serial_number::SerialNumber,
    spki::AlgorithmIdentifierOwned,
};

/// PIN of [`TestToken::holder`]
pub(crate) const HOLDER_PIN: &str = "1234";

fn cert(pem: &str) -> Certificate {
    Certificate::from_pem(pem).unwrap()
}

fn key(pem: &str) -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(pem).unwrap()
}

pub(crate) fn ca_cert() -> Certificate {
    cert(include_str!("../testdata/ca.pem"))
}

pub(crate) fn responder_cert() -> Certificate {
    cert(include_str!("../testdata/responder.pem"))
}

pub(crate) fn holder_auth_cert() -> Certificate {
    cert(include_str!("../testdata/holder-auth.pem"))
}

pub(crate) fn holder_sign_cert() -> Certificate {
    cert(include_str!("../testdata/holder-sign.pem"))
}

pub(crate) fn holder_expired_cert() -> Certificate {
    cert(include_str!("../testdata/holder-expired.pem"))
}

pub(crate) fn holder_legacy_cert() -> Certificate {
    cert(include_str!("../testdata/holder-legacy.pem"))
}

/// Holder certificate without key usage whose identity lives only in the CN
pub(crate) fn holder_cn_only_cert() -> Certificate {
    cert(include_str!("../testdata/holder-cn-only.pem"))
}

pub(crate) fn ec_auth_cert() -> Certificate {
    cert(include_str!("../testdata/ec-auth.pem"))
}

pub(crate) fn holder_key() -> RsaPrivateKey {
    key(include_str!("../testdata/holder.key"))
}

fn responder_key() -> RsaPrivateKey {
    key(include_str!("../testdata/responder.key"))
}

fn ca_key() -> RsaPrivateKey {
    key(include_str!("../testdata/ca.key"))
}

/// Context with the fixture responder and CA, asking `transport` for OCSP
pub(crate) fn test_context(transport: Box<dyn OcspTransport>) -> AuthContext {
    let mut ocsp = OcspConfig::new("testdata/responder.pem");
    ocsp.responder_url = Some("http://ocsp.test/".to_string());
    ocsp.issuer_certificates = vec!["testdata/ca.pem".into()];
    let config = AuthConfig {
        digest_algorithm: DigestAlgorithm::Sha512,
        pin_attempts: 3,
        ocsp,
        token: None,
    };
    AuthContext::from_parts(config, responder_cert(), vec![ca_cert()], transport)
}

#[derive(Default)]
struct TokenLogState {
    release_count: usize,
    sign_calls: usize,
    pins_seen: Vec<Vec<u8>>,
}

/// What happened to a [`TestToken`], observable after it was moved away
#[derive(Clone, Default)]
pub(crate) struct TokenLog(Rc<RefCell<TokenLogState>>);

impl TokenLog {
    pub(crate) fn released(&self) -> bool {
        self.0.borrow().release_count > 0
    }

    pub(crate) fn release_count(&self) -> usize {
        self.0.borrow().release_count
    }

    pub(crate) fn sign_calls(&self) -> usize {
        self.0.borrow().sign_calls
    }

    pub(crate) fn pins_seen(&self) -> Vec<Vec<u8>> {
        self.0.borrow().pins_seen.clone()
    }
}

enum Mode {
    Normal,
    Failing(String),
    Empty,
}

/// Soft token holding the fixture holder key, recording every call
pub(crate) struct TestToken {
    inner: SoftToken,
    mode: Mode,
    log: TokenLog,
}

impl TestToken {
    /// Signing and authentication certificate, in that order
    pub(crate) fn holder() -> Self {
        Self::with_certificates(vec![holder_sign_cert(), holder_auth_cert()])
    }

    pub(crate) fn with_certificates(certificates: Vec<Certificate>) -> Self {
        let inner = SoftToken::new(
            "test token",
            holder_key(),
            SecretString::new(HOLDER_PIN.to_string()),
            certificates,
        );
        Self {
            inner,
            mode: Mode::Normal,
            log: TokenLog::default(),
        }
    }

    /// PIN already blocked
    pub(crate) fn locked(mut self) -> Self {
        self.inner = self.inner.with_retries(0);
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.mode = Mode::Failing(message.to_string());
        self
    }

    pub(crate) fn returning_empty(mut self) -> Self {
        self.mode = Mode::Empty;
        self
    }

    pub(crate) fn log(&self) -> TokenLog {
        self.log.clone()
    }
}

impl Token for TestToken {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn enumerate_certificates(&mut self) -> Result<Vec<Certificate>> {
        self.inner.enumerate_certificates()
    }

    fn sign_with(
        &mut self,
        certificate: &Certificate,
        pin: &[u8],
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> std::result::Result<Vec<u8>, TokenFailure> {
        {
            let mut log = self.log.0.borrow_mut();
            log.sign_calls += 1;
            log.pins_seen.push(pin.to_vec());
        }
        match &self.mode {
            Mode::Normal => self.inner.sign_with(certificate, pin, algorithm, digest),
            Mode::Failing(message) => Err(TokenFailure::Device(message.clone())),
            Mode::Empty => Ok(Vec::new()),
        }
    }

    fn release(&mut self) {
        self.log.0.borrow_mut().release_count += 1;
        self.inner.release();
    }
}

/// Hands out PINs from a fixed list and records each request
pub(crate) struct ScriptedPins {
    pins: VecDeque<String>,
    requests: Rc<RefCell<Vec<(u8, Option<u8>)>>>,
}

impl ScriptedPins {
    pub(crate) fn new<'a>(pins: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            pins: pins.into_iter().map(str::to_string).collect(),
            requests: Rc::default(),
        }
    }

    /// `(attempt, remaining_attempts)` of every request so far
    pub(crate) fn requests(&self) -> Rc<RefCell<Vec<(u8, Option<u8>)>>> {
        Rc::clone(&self.requests)
    }
}

impl PinSource for ScriptedPins {
    fn read_pin(&mut self, request: &PinRequest<'_>, buffer: &mut PinBuffer) -> Result<()> {
        self.requests
            .borrow_mut()
            .push((request.attempt, request.remaining_attempts));
        let pin = self
            .pins
            .pop_front()
            .ok_or_else(|| AuthError::new(ErrorKind::Io, "no scripted PIN left"))?;
        buffer.set(pin.as_bytes())
    }
}

/// How [`TestResponder`] answers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behavior {
    Good,
    Revoked,
    Unknown,
    /// Transport gives up without an answer
    Timeout,
    /// Body is not DER
    Garbage,
    /// Signed by the CA instead of the trusted responder
    WrongSigner,
    TryLater,
    WrongNonce,
    /// nextUpdate lies a day in the past
    Stale,
    /// Answers about a different serial number
    OtherSerial,
    NoNonce,
    /// Years-old answer without nonce or nextUpdate
    Replayed,
    /// Recent answer without nonce or nextUpdate
    FreshWithoutNextUpdate,
    /// producedAt lies a day ahead
    FutureProducedAt,
    /// Nonce echoed but produced two days ago
    Aged,
}

#[derive(Default)]
struct ResponderLog {
    requests: Cell<usize>,
    last_url: RefCell<Option<String>>,
}

/// In-process OCSP responder signing with the fixture responder key
#[derive(Clone)]
pub(crate) struct TestResponder {
    behavior: Behavior,
    log: Rc<ResponderLog>,
}

impl TestResponder {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            log: Rc::default(),
        }
    }

    pub(crate) fn requests(&self) -> usize {
        self.log.requests.get()
    }

    pub(crate) fn last_url(&self) -> Option<String> {
        self.log.last_url.borrow().clone()
    }

    fn respond(&self, request: &[u8]) -> Vec<u8> {
        let request = OcspRequest::from_der(request).unwrap();
        let mut cert_id = request.tbs_request.request_list[0].req_cert.clone();
        if self.behavior == Behavior::OtherSerial {
            cert_id.serial_number = SerialNumber::new(&[0x7f, 0xff]).unwrap();
        }

        let nonce = request
            .tbs_request
            .request_extensions
            .unwrap_or_default()
            .into_iter()
            .find(|ext| ext.extn_id == rfc6960::ID_PKIX_OCSP_NONCE);
        let response_extensions = match self.behavior {
            Behavior::NoNonce | Behavior::Replayed | Behavior::FreshWithoutNextUpdate => None,
            Behavior::WrongNonce => Some(vec![Extension {
                extn_id: rfc6960::ID_PKIX_OCSP_NONCE,
                critical: false,
                extn_value: OctetString::new(vec![0x04, 0x02, 0xde, 0xad]).unwrap(),
            }]),
            _ => nonce.map(|ext| vec![ext]),
        };

        let now = Utc::now();
        let (produced_at, this_update, next_update) = match self.behavior {
            Behavior::Stale => (now, now - Duration::days(2), Some(now - Duration::days(1))),
            Behavior::Replayed => {
                let then = now - Duration::days(5 * 365);
                (then, then, None)
            }
            Behavior::FreshWithoutNextUpdate => (now, now - Duration::seconds(60), None),
            Behavior::FutureProducedAt => {
                (now + Duration::days(1), now - Duration::days(2), Some(now + Duration::hours(1)))
            }
            Behavior::Aged => (
                now - Duration::days(2),
                now - Duration::days(2),
                Some(now + Duration::hours(1)),
            ),
            _ => (now, now - Duration::days(2), Some(now + Duration::hours(1))),
        };
        let cert_status = match self.behavior {
            Behavior::Revoked => CertStatus::Revoked(RevokedInfo {
                revocation_time: generalized(now - Duration::days(1)),
                revocation_reason: Some(CrlReason::KeyCompromise),
            }),
            Behavior::Unknown => CertStatus::Unknown(Null),
            _ => CertStatus::Good(Null),
        };

        let data = ResponseData {
            version: Default::default(),
            responder_id: ResponderId::ByName(responder_cert().subject_name().clone()),
            produced_at: generalized(produced_at),
            responses: vec![SingleResponse {
                cert_id,
                cert_status,
                this_update: generalized(this_update),
                next_update: next_update.map(generalized),
                single_extensions: None,
            }],
            response_extensions,
        };

        let signer = if self.behavior == Behavior::WrongSigner {
            ca_key()
        } else {
            responder_key()
        };
        let digest = Sha256::digest(data.to_der().unwrap());
        let signature = signer.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();

        let basic = BasicOcspResponse {
            tbs_response_data: data,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::null()),
            },
            signature: BitString::from_bytes(&signature).unwrap(),
            certs: None,
        };
        OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: rfc6960::ID_PKIX_OCSP_BASIC,
                response: OctetString::new(basic.to_der().unwrap()).unwrap(),
            }),
        }
        .to_der()
        .unwrap()
    }
}

fn generalized(at: DateTime<Utc>) -> GeneralizedTime {
    let secs = u64::try_from(at.timestamp()).unwrap();
    GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(secs)).unwrap()
}

impl OcspTransport for TestResponder {
    fn send(&self, url: &str, request: &[u8]) -> Result<Vec<u8>> {
        self.log.requests.set(self.log.requests.get() + 1);
        *self.log.last_url.borrow_mut() = Some(url.to_string());

        match self.behavior {
            Behavior::Timeout => Err(AuthError::new(
                ErrorKind::CheckFailed,
                "no answer within 10s",
            )),
            Behavior::Garbage => Ok(b"<html>502 Bad Gateway</html>".to_vec()),
            Behavior::TryLater => Ok(OcspResponse {
                response_status: OcspResponseStatus::TryLater,
                response_bytes: None,
            }
            .to_der()
            .unwrap()),
            _ => Ok(self.respond(request)),
        }
    }
}
