//! Fail-closed OCSP revocation checking.
//!
//! Only a `good` status in a fresh response signed by the configured trusted
//! responder lets authentication proceed. Everything else, including network
//! trouble, is reported as a negative verdict.

pub mod asn1;
mod transport;

pub use transport::{HttpTransport, OcspTransport};

use crate::{
    certificate::{oid_name, Certificate},
    config::{CertIdHash, OcspConfig},
    error::{AuthError, ErrorKind, Result},
};
use asn1::{
    BasicOcspResponse, CertId, CertStatus, OcspRequest, OcspResponse, OcspResponseStatus,
    Request, TbsRequest,
};
use chrono::{DateTime, Duration, Utc};
use der::{
    asn1::{GeneralizedTime, OctetString},
    oid::{
        db::{rfc5912, rfc6960},
        AssociatedOid, ObjectIdentifier,
    },
    Any, Decode, Encode,
};
use rand::{rngs::OsRng, RngCore};
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_cert::{
    ext::{pkix::CrlReason, Extension},
    spki::AlgorithmIdentifierOwned,
};

/// Nonce length sent in requests
pub const NONCE_LEN: usize = 32;

/// Tolerated clock difference between us and the responder
const CLOCK_SKEW_SECS: i64 = 300;

/// Outcome of one revocation check
#[derive(Debug)]
pub enum RevocationVerdict {
    Good {
        produced_at: DateTime<Utc>,
    },
    Revoked {
        produced_at: DateTime<Utc>,
        revoked_at: DateTime<Utc>,
        reason: Option<CrlReason>,
    },
    Unknown {
        produced_at: DateTime<Utc>,
    },
    CheckFailed {
        reason: AuthError,
    },
}

impl RevocationVerdict {
    pub fn is_good(&self) -> bool {
        matches!(self, RevocationVerdict::Good { .. })
    }

    /// Only `Good` is a success; the responder's `produced_at` is returned
    pub fn into_result(self) -> Result<DateTime<Utc>> {
        match self {
            RevocationVerdict::Good { produced_at } => Ok(produced_at),
            RevocationVerdict::Revoked {
                revoked_at, reason, ..
            } => {
                let reason = reason
                    .map(|r| format!(" ({r:?})"))
                    .unwrap_or_default();
                Err(AuthError::new(
                    ErrorKind::Revoked,
                    format!("certificate was revoked at {revoked_at}{reason}"),
                ))
            }
            RevocationVerdict::Unknown { produced_at } => Err(AuthError::new(
                ErrorKind::CheckFailed,
                format!("responder does not know the certificate (response of {produced_at})"),
            )),
            RevocationVerdict::CheckFailed { reason } => Err(reason),
        }
    }
}

/// Queries the configured OCSP responder about one certificate at a time
pub struct RevocationChecker<'a> {
    config: &'a OcspConfig,
    responder: &'a Certificate,
    issuers: &'a [Certificate],
    transport: &'a dyn OcspTransport,
}

impl<'a> RevocationChecker<'a> {
    pub fn new(
        config: &'a OcspConfig,
        responder: &'a Certificate,
        issuers: &'a [Certificate],
        transport: &'a dyn OcspTransport,
    ) -> Self {
        Self {
            config,
            responder,
            issuers,
            transport,
        }
    }

    /// Establish the revocation status of `certificate` right now
    ///
    /// Never returns `Good` unless a response signed by the trusted
    /// responder says so. Any failure along the way yields `CheckFailed`.
    pub fn check_status(&self, certificate: &Certificate) -> RevocationVerdict {
        match self.query(certificate, Utc::now()) {
            Ok(verdict) => verdict,
            Err(e) if e.kind() == ErrorKind::CheckFailed => RevocationVerdict::CheckFailed { reason: e },
            Err(e) => RevocationVerdict::CheckFailed {
                reason: AuthError::new(
                    ErrorKind::CheckFailed,
                    "revocation status could not be established",
                )
                .with_cause(e),
            },
        }
    }

    fn query(&self, certificate: &Certificate, now: DateTime<Utc>) -> Result<RevocationVerdict> {
        if !certificate.is_valid_at(now) {
            return Err(check_failed(format!(
                "certificate {} is valid from {} to {}",
                certificate.serial_hex(),
                certificate.not_before(),
                certificate.not_after()
            )));
        }

        let issuer = self.find_issuer(certificate)?;
        let cert_id = cert_id(certificate, issuer, self.config.cert_id_hash)?;
        let nonce = if self.config.send_nonce {
            Some(new_nonce()?)
        } else {
            None
        };
        let request = encode_request(&cert_id, nonce.as_deref())?;
        let url = self.responder_url(certificate)?;

        tracing::debug!(
            %url,
            serial = %certificate.serial_hex(),
            nonce = %nonce.as_deref().map(hex::encode).unwrap_or_default(),
            "sending OCSP request"
        );
        let body = self
            .transport
            .send(&url, &request)
            .map_err(|e| check_failed(format!("OCSP request to {url} failed")).with_cause(e))?;

        let verdict = self.evaluate(&body, &cert_id, nonce.as_deref(), now)?;
        tracing::info!(serial = %certificate.serial_hex(), ?verdict, "OCSP verdict");
        Ok(verdict)
    }

    fn find_issuer(&self, certificate: &Certificate) -> Result<&'a Certificate> {
        self.issuers
            .iter()
            .find(|issuer| issuer.subject_name() == certificate.issuer_name())
            .ok_or_else(|| {
                check_failed(format!(
                    "issuer {} is not among the configured issuer certificates",
                    certificate.issuer()
                ))
            })
    }

    fn responder_url(&self, certificate: &Certificate) -> Result<String> {
        self.config
            .responder_url
            .clone()
            .or_else(|| certificate.ocsp_url())
            .ok_or_else(|| {
                check_failed(format!(
                    "no responder URL configured and certificate {} names none",
                    certificate.serial_hex()
                ))
            })
    }

    fn evaluate(
        &self,
        body: &[u8],
        cert_id: &CertId,
        nonce: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<RevocationVerdict> {
        let response = OcspResponse::from_der(body)
            .map_err(|e| check_failed(format!("malformed OCSP response: {e}")))?;
        if response.response_status != OcspResponseStatus::Successful {
            return Err(check_failed(format!(
                "responder answered {:?}",
                response.response_status
            )));
        }
        let bytes = response
            .response_bytes
            .ok_or_else(|| check_failed("successful response without a body"))?;
        if bytes.response_type != rfc6960::ID_PKIX_OCSP_BASIC {
            return Err(check_failed(format!(
                "unsupported response type {}",
                oid_name(&bytes.response_type)
            )));
        }
        let basic = BasicOcspResponse::from_der(bytes.response.as_bytes())
            .map_err(|e| check_failed(format!("malformed basic OCSP response: {e}")))?;

        self.verify_response_signature(&basic)?;

        let data = basic.tbs_response_data;
        let nonce_verified = check_nonce(
            nonce,
            data.response_extensions.as_deref(),
            self.config.require_nonce,
        )?;

        let skew = Duration::seconds(CLOCK_SKEW_SECS);
        let produced_at = to_utc(&data.produced_at);
        if produced_at > now + skew {
            return Err(check_failed(format!(
                "response producedAt {produced_at} lies in the future"
            )));
        }
        if let Some(max_age) = self.config.max_response_age_secs {
            if older_than(produced_at, now, max_age) {
                return Err(check_failed(format!(
                    "response produced at {produced_at} is older than {max_age}s"
                )));
            }
        }

        let single = data
            .responses
            .into_iter()
            .find(|single| single.cert_id.matches(cert_id))
            .ok_or_else(|| {
                check_failed(format!(
                    "response does not cover serial {}",
                    cert_id.serial_number
                ))
            })?;

        let this_update = to_utc(&single.this_update);
        if this_update > now + skew {
            return Err(check_failed(format!(
                "response thisUpdate {this_update} lies in the future"
            )));
        }
        match single.next_update.as_ref().map(to_utc) {
            Some(next_update) if next_update + skew < now => {
                return Err(check_failed(format!(
                    "response expired at nextUpdate {next_update}"
                )));
            }
            Some(_) => {}
            // nothing bounds the validity of this answer, so it must be recent
            None if !nonce_verified => {
                let window = self.config.freshness_window_secs;
                if older_than(this_update, now, window) || older_than(produced_at, now, window) {
                    return Err(check_failed(format!(
                        "response without nonce or nextUpdate was issued at {this_update}, \
                         more than {window}s ago"
                    )));
                }
            }
            None => {}
        }

        Ok(match single.cert_status {
            CertStatus::Good(_) => RevocationVerdict::Good { produced_at },
            CertStatus::Revoked(info) => RevocationVerdict::Revoked {
                produced_at,
                revoked_at: to_utc(&info.revocation_time),
                reason: info.revocation_reason,
            },
            CertStatus::Unknown(_) => RevocationVerdict::Unknown { produced_at },
        })
    }

    fn verify_response_signature(&self, basic: &BasicOcspResponse) -> Result<()> {
        let key = self
            .responder
            .rsa_public_key()
            .map_err(|e| check_failed("trusted responder certificate is unusable").with_cause(e))?;
        let signed = basic
            .tbs_response_data
            .to_der()
            .map_err(|e| check_failed(format!("cannot re-encode response data: {e}")))?;
        let signature = basic
            .signature
            .as_bytes()
            .ok_or_else(|| check_failed("response signature is not octet aligned"))?;

        let algorithm = basic.signature_algorithm.oid;
        let (scheme, digest) = match algorithm {
            rfc5912::SHA_1_WITH_RSA_ENCRYPTION => {
                (Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(&signed).to_vec())
            }
            rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
                (Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(&signed).to_vec())
            }
            rfc5912::SHA_384_WITH_RSA_ENCRYPTION => {
                (Pkcs1v15Sign::new::<Sha384>(), Sha384::digest(&signed).to_vec())
            }
            rfc5912::SHA_512_WITH_RSA_ENCRYPTION => {
                (Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(&signed).to_vec())
            }
            other => {
                return Err(check_failed(format!(
                    "unsupported response signature algorithm {}",
                    oid_name(&other)
                )))
            }
        };

        key.verify(scheme, &digest, signature).map_err(|_| {
            check_failed(format!(
                "response is not signed by the trusted responder {}",
                self.responder.subject()
            ))
        })
    }
}

fn check_failed(message: impl Into<String>) -> AuthError {
    AuthError::new(ErrorKind::CheckFailed, message)
}

fn to_utc(time: &GeneralizedTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time.to_system_time())
}

fn older_than(time: DateTime<Utc>, now: DateTime<Utc>, max_age_secs: u64) -> bool {
    let age = now.signed_duration_since(time).num_seconds();
    age > i64::try_from(max_age_secs).unwrap_or(i64::MAX)
}

fn new_nonce() -> Result<Vec<u8>> {
    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce).map_err(|e| {
        AuthError::new(ErrorKind::Entropy, format!("cannot generate OCSP nonce: {e}"))
    })?;
    Ok(nonce)
}

/// Build the CertID identifying `certificate` to the responder
pub fn cert_id(certificate: &Certificate, issuer: &Certificate, hash: CertIdHash) -> Result<CertId> {
    let issuer_name = issuer
        .subject_name()
        .to_der()
        .map_err(|e| check_failed(format!("cannot encode issuer name: {e}")))?;
    let issuer_key = issuer.public_key_bits();

    let (oid, name_hash, key_hash) = match hash {
        CertIdHash::Sha1 => (
            Sha1::OID,
            Sha1::digest(&issuer_name).to_vec(),
            Sha1::digest(issuer_key).to_vec(),
        ),
        CertIdHash::Sha256 => (
            Sha256::OID,
            Sha256::digest(&issuer_name).to_vec(),
            Sha256::digest(issuer_key).to_vec(),
        ),
    };

    let octets = |bytes: Vec<u8>| {
        OctetString::new(bytes).map_err(|e| check_failed(format!("cannot encode CertID: {e}")))
    };
    Ok(CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid,
            parameters: Some(Any::null()),
        },
        issuer_name_hash: octets(name_hash)?,
        issuer_key_hash: octets(key_hash)?,
        serial_number: certificate.serial().clone(),
    })
}

/// Nonce extension value: the nonce as a DER OCTET STRING (RFC 8954)
fn nonce_extension(nonce: &[u8]) -> Result<Extension> {
    let value = OctetString::new(nonce)
        .and_then(|inner| inner.to_der())
        .and_then(OctetString::new)
        .map_err(|e| check_failed(format!("cannot encode nonce: {e}")))?;
    Ok(Extension {
        extn_id: rfc6960::ID_PKIX_OCSP_NONCE,
        critical: false,
        extn_value: value,
    })
}

/// DER encoding of a single-certificate OCSP request
pub fn encode_request(cert_id: &CertId, nonce: Option<&[u8]>) -> Result<Vec<u8>> {
    let request_extensions = nonce
        .map(|n| nonce_extension(n).map(|ext| vec![ext]))
        .transpose()?;
    let request = OcspRequest {
        tbs_request: TbsRequest {
            version: Default::default(),
            request_list: vec![Request {
                req_cert: cert_id.clone(),
                single_request_extensions: None,
            }],
            request_extensions,
        },
    };
    request
        .to_der()
        .map_err(|e| check_failed(format!("cannot encode OCSP request: {e}")))
}

fn find_extension<'e>(extensions: Option<&'e [Extension]>, oid: ObjectIdentifier) -> Option<&'e Extension> {
    extensions?.iter().find(|ext| ext.extn_id == oid)
}

/// Returns whether the response echoed the nonce we sent
fn check_nonce(sent: Option<&[u8]>, extensions: Option<&[Extension]>, required: bool) -> Result<bool> {
    let Some(sent) = sent else {
        return Ok(false);
    };
    match find_extension(extensions, rfc6960::ID_PKIX_OCSP_NONCE) {
        Some(echoed) => {
            let expected = nonce_extension(sent)?.extn_value;
            // some responders echo the raw nonce without the inner OCTET STRING
            if echoed.extn_value == expected || echoed.extn_value.as_bytes() == sent {
                Ok(true)
            } else {
                Err(check_failed("response nonce does not match the request"))
            }
        }
        None if required => Err(check_failed("response does not echo the request nonce")),
        None => {
            tracing::warn!("OCSP response carries no nonce, replay protection relies on freshness");
            Ok(false)
        }
    }
}
