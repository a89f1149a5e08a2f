use crate::{
    certificate::Certificate,
    config::AuthConfig,
    error::{AuthError, ErrorKind, Result, Stage},
    ocsp::{HttpTransport, OcspTransport, RevocationChecker},
};
use std::time::Duration;

/// Process-level state every authentication session draws on
///
/// Holds the loaded configuration, the trusted OCSP responder certificate,
/// the issuer certificates and the transport used to reach the responder.
/// Created once before any session and passed to each
/// [`crate::auth::Authenticator`]; dropping it tears everything down.
/// Independent contexts never share state, so tests can run side by side.
pub struct AuthContext {
    config: AuthConfig,
    responder: Certificate,
    issuers: Vec<Certificate>,
    transport: Box<dyn OcspTransport>,
}

impl AuthContext {
    /// Load certificates named in `config` and set up the HTTP transport
    ///
    /// # Errors
    /// - `Config` - A certificate is missing or unusable, or no issuer is configured
    pub fn init(config: AuthConfig) -> Result<Self> {
        let transport = HttpTransport::new(Duration::from_secs(config.ocsp.timeout_secs))
            .map_err(|e| e.in_stage(Stage::Context))?;
        Self::with_transport(config, Box::new(transport))
    }

    /// Like [`AuthContext::init`] with a caller-supplied OCSP transport
    pub fn with_transport(config: AuthConfig, transport: Box<dyn OcspTransport>) -> Result<Self> {
        let responder = Certificate::load(&config.ocsp.responder_certificate)
            .and_then(|cert| cert.rsa_public_key().map(|_| cert))
            .map_err(|e| {
                AuthError::new(
                    ErrorKind::Config,
                    "trusted OCSP responder certificate is unusable",
                )
                .with_cause(e)
                .in_stage(Stage::Context)
            })?;

        if config.ocsp.issuer_certificates.is_empty() {
            return Err(AuthError::new(
                ErrorKind::Config,
                "no issuer certificates configured, revocation cannot be checked",
            )
            .in_stage(Stage::Context));
        }
        let issuers = config
            .ocsp
            .issuer_certificates
            .iter()
            .map(|path| Certificate::load(path))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.in_stage(Stage::Context))?;

        Ok(Self::from_parts(config, responder, issuers, transport))
    }

    /// Assemble a context from already loaded parts
    pub fn from_parts(
        config: AuthConfig,
        responder: Certificate,
        issuers: Vec<Certificate>,
        transport: Box<dyn OcspTransport>,
    ) -> Self {
        tracing::debug!(
            responder = %responder.subject(),
            issuers = issuers.len(),
            digest = %config.digest_algorithm,
            "authentication context initialized"
        );
        Self {
            config,
            responder,
            issuers,
            transport,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn responder_certificate(&self) -> &Certificate {
        &self.responder
    }

    pub fn revocation_checker(&self) -> RevocationChecker<'_> {
        RevocationChecker::new(
            &self.config.ocsp,
            &self.responder,
            &self.issuers,
            self.transport.as_ref(),
        )
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        tracing::debug!("authentication context released");
    }
}
