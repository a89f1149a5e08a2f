use crate::{
    crypto::challenge::DigestAlgorithm,
    error::{AuthError, ErrorKind, Result},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Prefix of environment variables overriding file settings
///
/// Nested keys are separated by a double underscore, e.g.
/// `EID_AUTH_OCSP__RESPONDER_URL=http://localhost:8080/`.
pub const ENV_PREFIX: &str = "EID_AUTH";

/// Settings for one authentication process
///
/// Loaded once at startup and handed to [`crate::context::AuthContext`].
///
/// # Example
/// ```toml
/// digest_algorithm = "sha512"
/// pin_attempts = 3
///
/// [ocsp]
/// responder_url = "http://demo.sk.ee/ocsp"
/// responder_certificate = "certs/TEST_of_SK_OCSP_RESPONDER_2020.pem"
/// issuer_certificates = ["certs/TEST_of_ESTEID-SK_2015.pem"]
/// timeout_secs = 10
///
/// [token]
/// label = "software token"
/// private_key = "keys/auth.key"
/// certificates = ["certs/auth.pem", "certs/sign.pem"]
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    /// Digest algorithm the challenge is declared as
    ///
    /// Must be one the token can sign. Defaults to SHA-512, which gives a
    /// 64 byte challenge.
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,

    /// PIN prompts allowed within one signing operation
    #[serde(default = "default_pin_attempts")]
    pub pin_attempts: u8,

    pub ocsp: OcspConfig,

    /// Software token to use instead of a hardware card
    #[serde(default)]
    pub token: Option<TokenConfig>,
}

/// Hash used for the issuer name and key hashes of an OCSP CertID
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertIdHash {
    #[default]
    Sha1,
    Sha256,
}

/// OCSP responder settings
#[derive(Clone, Debug, Deserialize)]
pub struct OcspConfig {
    /// Responder URL
    ///
    /// When unset, the URL is taken from the certificate's Authority
    /// Information Access extension.
    #[serde(default)]
    pub responder_url: Option<String>,

    /// Certificate whose key must have signed every OCSP response
    pub responder_certificate: PathBuf,

    /// Certificates of the CAs issuing holder certificates
    #[serde(default)]
    pub issuer_certificates: Vec<PathBuf>,

    /// Upper bound for the whole OCSP round trip
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Send a nonce extension with each request
    #[serde(default = "default_true")]
    pub send_nonce: bool,

    /// Reject responses that do not echo the nonce
    #[serde(default)]
    pub require_nonce: bool,

    /// Reject responses produced longer ago than this
    #[serde(default)]
    pub max_response_age_secs: Option<u64>,

    /// Maximum age of a response that neither echoes our nonce nor carries
    /// a nextUpdate
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,

    #[serde(default)]
    pub cert_id_hash: CertIdHash,
}

/// Encrypted PKCS#8 key and certificates forming a software token
///
/// The PIN entered at the prompt is the key's password.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_label")]
    pub label: String,
    pub private_key: PathBuf,
    pub certificates: Vec<PathBuf>,
}

fn default_pin_attempts() -> u8 {
    3
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_freshness_window_secs() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

fn default_token_label() -> String {
    "software token".to_string()
}

impl OcspConfig {
    /// Defaults for everything except the trusted responder certificate
    pub fn new(responder_certificate: impl Into<PathBuf>) -> Self {
        Self {
            responder_url: None,
            responder_certificate: responder_certificate.into(),
            issuer_certificates: Vec::new(),
            timeout_secs: default_timeout_secs(),
            send_nonce: true,
            require_nonce: false,
            max_response_age_secs: None,
            freshness_window_secs: default_freshness_window_secs(),
            cert_id_hash: CertIdHash::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from a TOML file, overridden by `EID_AUTH_*`
    /// environment variables
    ///
    /// Relative paths in the file are resolved against the file's directory.
    ///
    /// # Errors
    /// - `Config` - The file is missing or a setting is invalid
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                AuthError::new(
                    ErrorKind::Config,
                    format!("cannot read configuration {}: {}", path.display(), e),
                )
            })?;

        let mut config = settings.try_deserialize::<AuthConfig>().map_err(|e| {
            AuthError::new(
                ErrorKind::Config,
                format!("invalid configuration {}: {}", path.display(), e),
            )
        })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.ocsp.responder_certificate);
        self.ocsp.issuer_certificates.iter_mut().for_each(resolve);
        if let Some(token) = self.token.as_mut() {
            resolve(&mut token.private_key);
            token.certificates.iter_mut().for_each(resolve);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pin_attempts == 0 {
            return Err(AuthError::new(
                ErrorKind::Config,
                "pin_attempts must be at least 1",
            ));
        }
        if self.ocsp.timeout_secs == 0 {
            return Err(AuthError::new(
                ErrorKind::Config,
                "ocsp.timeout_secs must be at least 1",
            ));
        }
        if self.ocsp.require_nonce && !self.ocsp.send_nonce {
            return Err(AuthError::new(
                ErrorKind::Config,
                "ocsp.require_nonce needs ocsp.send_nonce",
            ));
        }
        Ok(())
    }
}
