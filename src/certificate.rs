//! X.509 certificates as read from a token or from configuration.
//!
//! [`Certificate`] wraps a parsed certificate together with its DER encoding
//! and exposes only what the authentication flow needs: names, key usage,
//! validity, the RSA public key and the OCSP responder location.

use crate::error::{AuthError, ErrorKind, Result};
use chrono::{DateTime, Utc};
use der::{
    asn1::{BitString, BmpString},
    oid::{
        db::{rfc4519, rfc5280, rfc5912, DB},
        ObjectIdentifier,
    },
    Any, Decode, DecodePem, Encode, Tag, Tagged,
};
use rsa::{pkcs1::DecodeRsaPublicKey, RsaPublicKey};
use serde::Serialize;
use std::{path::Path, time::SystemTime};
use x509_cert::{
    ext::pkix::{name::GeneralName, AuthorityInfoAccessSyntax},
    name::Name,
    serial_number::SerialNumber,
};

/// An immutable X.509 certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    inner: x509_cert::Certificate,
    der: Vec<u8>,
}

/// Key usage bits indexed by their RFC 5280 bit position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyUsage(u16);

impl KeyUsage {
    pub const DIGITAL_SIGNATURE: usize = 0;
    pub const NON_REPUDIATION: usize = 1;
    pub const KEY_ENCIPHERMENT: usize = 2;

    fn from_bit_string(bits: &BitString) -> Self {
        let mut value = 0u16;
        for (position, set) in bits.bits().enumerate().take(16) {
            if set {
                value |= 1 << position;
            }
        }
        KeyUsage(value)
    }

    pub fn bit(&self, position: usize) -> bool {
        position < 16 && self.0 & (1 << position) != 0
    }

    pub fn digital_signature(&self) -> bool {
        self.bit(Self::DIGITAL_SIGNATURE)
    }

    pub fn non_repudiation(&self) -> bool {
        self.bit(Self::NON_REPUDIATION)
    }
}

/// Holder identity parsed from an eID authentication certificate subject
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PersonalIdentity {
    pub surname: String,
    pub given_name: String,
    pub personal_code: String,
    pub country: Option<String>,
}

impl Certificate {
    /// Parse a DER-encoded certificate as returned by a token
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = x509_cert::Certificate::from_der(bytes).map_err(|e| {
            AuthError::new(ErrorKind::Token, format!("malformed certificate: {e}"))
        })?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    /// Parse a PEM-encoded certificate
    pub fn from_pem(pem: &str) -> Result<Self> {
        let inner = x509_cert::Certificate::from_pem(pem).map_err(|e| {
            AuthError::new(ErrorKind::Config, format!("malformed PEM certificate: {e}"))
        })?;
        let der = inner.to_der().map_err(|e| {
            AuthError::new(ErrorKind::Config, format!("certificate re-encoding failed: {e}"))
        })?;
        Ok(Self { inner, der })
    }

    /// Load a PEM or DER certificate file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            AuthError::new(
                ErrorKind::Config,
                format!("cannot read certificate {}: {e}", path.display()),
            )
        })?;
        let parsed = match std::str::from_utf8(&bytes) {
            Ok(text) if text.contains("-----BEGIN") => Self::from_pem(text),
            _ => Self::from_der(&bytes).map_err(|e| AuthError::new(ErrorKind::Config, e.message())),
        };
        parsed.map_err(|e| e.context(format!("loading {}", path.display())))
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub(crate) fn subject_name(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub(crate) fn issuer_name(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    /// Subject distinguished name, most specific attribute first
    pub fn subject(&self) -> String {
        render_name(self.subject_name())
    }

    pub fn issuer(&self) -> String {
        render_name(self.issuer_name())
    }

    pub(crate) fn serial(&self) -> &SerialNumber {
        &self.inner.tbs_certificate.serial_number
    }

    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.serial_number())
    }

    /// Key usage bits, `None` when the extension is absent or unreadable
    pub fn key_usage(&self) -> Option<KeyUsage> {
        let extension = self
            .inner
            .tbs_certificate
            .extensions
            .as_deref()?
            .iter()
            .find(|ext| ext.extn_id == rfc5280::ID_CE_KEY_USAGE)?;
        match BitString::from_der(extension.extn_value.as_bytes()) {
            Ok(bits) => Some(KeyUsage::from_bit_string(&bits)),
            Err(e) => {
                tracing::debug!(serial = %self.serial_hex(), error = %e, "unreadable key usage extension");
                None
            }
        }
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        let time = self.inner.tbs_certificate.validity.not_before.to_system_time();
        DateTime::<Utc>::from(time)
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        let time = self.inner.tbs_certificate.validity.not_after.to_system_time();
        DateTime::<Utc>::from(time)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before() <= at && at <= self.not_after()
    }

    pub fn is_valid_now(&self) -> bool {
        self.is_valid_at(DateTime::<Utc>::from(SystemTime::now()))
    }

    pub(crate) fn public_key_bits(&self) -> &[u8] {
        self.inner
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
    }

    /// Extract the RSA public key
    ///
    /// # Errors
    /// - `UnsupportedKeyType` - The key is not an RSA key
    /// - `Protocol` - The key claims to be RSA but cannot be decoded
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey> {
        let algorithm = &self.inner.tbs_certificate.subject_public_key_info.algorithm;
        if algorithm.oid != rfc5912::RSA_ENCRYPTION {
            return Err(AuthError::new(
                ErrorKind::UnsupportedKeyType,
                format!("certificate key algorithm is {}", oid_name(&algorithm.oid)),
            ));
        }
        RsaPublicKey::from_pkcs1_der(self.public_key_bits()).map_err(|e| {
            AuthError::new(ErrorKind::Protocol, format!("malformed RSA public key: {e}"))
        })
    }

    /// OCSP responder location from the Authority Information Access extension
    pub fn ocsp_url(&self) -> Option<String> {
        let (_, aia) = self
            .inner
            .tbs_certificate
            .get::<AuthorityInfoAccessSyntax>()
            .ok()??;
        aia.0
            .into_iter()
            .filter(|desc| desc.access_method == rfc5280::ID_AD_OCSP)
            .find_map(|desc| match desc.access_location {
                GeneralName::UniformResourceIdentifier(uri) => Some(uri.as_str().to_string()),
                _ => None,
            })
    }

    /// Parse the holder identity out of the subject
    ///
    /// Uses the surname, given name and serialNumber attributes. Cards issued
    /// before those attributes were populated carry the same data in the
    /// common name as `SURNAME,GIVEN NAME,CODE`.
    pub fn identity(&self) -> Option<PersonalIdentity> {
        let name = self.subject_name();
        let country = attribute(name, rfc4519::C);

        let structured = (
            attribute(name, rfc4519::SN),
            attribute(name, rfc4519::GIVEN_NAME),
            attribute(name, rfc4519::SERIAL_NUMBER),
        );
        if let (Some(surname), Some(given_name), Some(code)) = structured {
            return Some(PersonalIdentity {
                surname,
                given_name,
                personal_code: strip_semantics_prefix(&code).to_string(),
                country,
            });
        }

        let common_name = attribute(name, rfc4519::CN)?;
        let mut parts = common_name.split(',');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(surname), Some(given_name), Some(code), None) => Some(PersonalIdentity {
                surname: surname.to_string(),
                given_name: given_name.to_string(),
                personal_code: strip_semantics_prefix(code).to_string(),
                country,
            }),
            _ => None,
        }
    }
}

/// Strip an ETSI EN 319 412-1 semantics identifier such as `PNOEE-`
fn strip_semantics_prefix(code: &str) -> &str {
    match code.get(..6) {
        Some(prefix) if prefix.starts_with("PNO") && prefix.ends_with('-') => &code[6..],
        _ => code,
    }
}

fn attribute(name: &Name, oid: ObjectIdentifier) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == oid)
        .and_then(|atv| attribute_text(&atv.value))
}

fn attribute_text(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::VisibleString => {
            std::str::from_utf8(value.value()).ok().map(str::to_string)
        }
        Tag::TeletexString => Some(value.value().iter().map(|&b| b as char).collect()),
        Tag::BmpString => BmpString::from_ucs2(value.value().to_vec())
            .ok()
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn short_name(oid: &ObjectIdentifier) -> String {
    let known = [
        (rfc4519::CN, "CN"),
        (rfc4519::SN, "SN"),
        (rfc4519::GIVEN_NAME, "GN"),
        (rfc4519::SERIAL_NUMBER, "serialNumber"),
        (rfc4519::C, "C"),
        (rfc4519::L, "L"),
        (rfc4519::ST, "ST"),
        (rfc4519::O, "O"),
        (rfc4519::OU, "OU"),
    ];
    known
        .iter()
        .find(|(known_oid, _)| known_oid == oid)
        .map(|(_, short)| short.to_string())
        .unwrap_or_else(|| oid.to_string())
}

pub(crate) fn oid_name(oid: &ObjectIdentifier) -> String {
    DB.by_oid(oid)
        .map(str::to_string)
        .unwrap_or_else(|| oid.to_string())
}

/// Render a name RFC 4514 style (last RDN first)
fn render_name(name: &Name) -> String {
    name.0
        .iter()
        .rev()
        .map(|rdn| {
            rdn.0
                .iter()
                .map(|atv| {
                    let value = match attribute_text(&atv.value) {
                        Some(text) => escape_value(&text),
                        None => match atv.value.to_der() {
                            Ok(der) => format!("#{}", hex::encode(der)),
                            Err(_) => String::new(),
                        },
                    };
                    format!("{}={}", short_name(&atv.oid), value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, ch) in value.chars().enumerate() {
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (ch == '#' || ch == ' '))
            || (i == last && ch == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
