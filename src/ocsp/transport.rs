use crate::error::{AuthError, ErrorKind, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

/// Delivers a DER-encoded OCSP request and returns the raw response body
pub trait OcspTransport {
    fn send(&self, url: &str, request: &[u8]) -> Result<Vec<u8>>;
}

/// OCSP over HTTP POST (RFC 6960 Appendix A) with a bounded wait
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    /// - `Config` - The HTTP client could not be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("eid-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AuthError::new(ErrorKind::Config, format!("cannot build HTTP client: {e}"))
            })?;
        Ok(Self { client, timeout })
    }
}

impl OcspTransport for HttpTransport {
    fn send(&self, url: &str, request: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/ocsp-request")
            .header(ACCEPT, "application/ocsp-response")
            .body(request.to_vec())
            .send()
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("no answer within {}s", self.timeout.as_secs())
                } else {
                    format!("transport error: {e}")
                };
                AuthError::new(ErrorKind::CheckFailed, message)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::new(
                ErrorKind::CheckFailed,
                format!("responder returned HTTP {status}"),
            ));
        }

        let body = response.bytes().map_err(|e| {
            AuthError::new(
                ErrorKind::CheckFailed,
                format!("cannot read response body: {e}"),
            )
        })?;
        tracing::trace!(url, length = body.len(), "OCSP response received");
        Ok(body.to_vec())
    }
}
