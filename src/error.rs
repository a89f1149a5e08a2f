use std::fmt;
use thiserror::Error;

/// Category of an authentication failure
///
/// Every failure the library can report falls into exactly one category.
/// Categories are what a caller reacts to (retry, alert, ask for a new card),
/// so each one maps to its own process exit code.
///
/// # Example
/// ```rust
/// use eid_auth::{AuthError, ErrorKind};
///
/// let err = AuthError::new(ErrorKind::PinCancelled, "holder cancelled the prompt");
/// match err.kind() {
///     ErrorKind::PinCancelled => println!("nothing to do, the holder backed out"),
///     ErrorKind::PinIncorrect { remaining_attempts } => {
///         println!("wrong PIN, {:?} attempts left", remaining_attempts)
///     }
///     other => println!("failed: {}", other),
/// }
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The random source could not supply a challenge
    #[error("entropy source failure")]
    Entropy,

    /// No certificate on the token is usable for authentication
    ///
    /// This error occurs when:
    /// - The token carries no certificates at all
    /// - No certificate has the digital-signature key usage bit set
    #[error("no usable authentication certificate")]
    NoUsableCertificate,

    /// The holder supplied an empty PIN or cancelled the prompt
    #[error("PIN entry cancelled")]
    PinCancelled,

    /// The token rejected the PIN
    ///
    /// Carries the number of attempts left before the token locks, when the
    /// token reports one. `Some(0)` means the PIN is blocked.
    #[error("incorrect PIN{}", remaining_hint(.remaining_attempts))]
    PinIncorrect { remaining_attempts: Option<u8> },

    /// Communication or hardware failure while talking to the token
    #[error("token failure")]
    Token,

    /// The certificate key is not of a supported algorithm family (RSA only)
    #[error("unsupported key type")]
    UnsupportedKeyType,

    /// The signature does not verify against the challenge and certificate
    ///
    /// This error occurs when:
    /// - The signature was produced by a different key
    /// - The signature or challenge was altered
    /// - The signature carries a different digest algorithm tag
    #[error("signature invalid")]
    SignatureInvalid,

    /// Malformed data exchanged between stages
    ///
    /// This error occurs when:
    /// - A challenge length does not match its digest algorithm
    /// - A signature length does not match the signing key modulus
    #[error("protocol error")]
    Protocol,

    /// The revocation status could not be established
    ///
    /// Network failures, timeouts, malformed or unsigned responses, stale
    /// responses and `Unknown` verdicts all land here.
    #[error("revocation check failed")]
    CheckFailed,

    /// The responder reported the certificate as revoked
    #[error("certificate revoked")]
    Revoked,

    /// Configuration is missing or invalid
    #[error("configuration error")]
    Config,

    /// Local input/output failure (terminal, files)
    #[error("I/O error")]
    Io,
}

fn remaining_hint(remaining: &Option<u8>) -> String {
    match remaining {
        Some(0) => " (PIN blocked)".to_string(),
        Some(n) => format!(" ({n} attempts remaining)"),
        None => String::new(),
    }
}

impl ErrorKind {
    /// Process exit code for this failure category
    ///
    /// Zero is reserved for a successful authentication.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Config => 1,
            ErrorKind::PinCancelled => 2,
            ErrorKind::PinIncorrect { .. } => 3,
            ErrorKind::NoUsableCertificate => 4,
            ErrorKind::SignatureInvalid => 5,
            ErrorKind::Revoked => 6,
            ErrorKind::CheckFailed => 7,
            ErrorKind::Token => 8,
            ErrorKind::Io => 9,
            ErrorKind::Entropy => 10,
            ErrorKind::UnsupportedKeyType => 11,
            ErrorKind::Protocol => 12,
        }
    }
}

/// Stage of the authentication flow an error was raised in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Context,
    CertificateSelection,
    ChallengeGeneration,
    Signing,
    Verification,
    Revocation,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Context => "context initialization",
            Stage::CertificateSelection => "certificate selection",
            Stage::ChallengeGeneration => "challenge generation",
            Stage::Signing => "signing",
            Stage::Verification => "signature verification",
            Stage::Revocation => "revocation check",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Authentication error with an explicit cause chain
///
/// Each error carries its category, the stage it surfaced in (once the
/// orchestrator has attributed it) and an optional boxed cause. Wrapping an
/// error with [`AuthError::context`] keeps the category of the innermost
/// failure so the exit code always reflects the root cause.
///
/// Messages must never contain PIN material.
///
/// # Example
/// ```rust
/// use eid_auth::{AuthError, ErrorKind};
///
/// let root = AuthError::new(ErrorKind::CheckFailed, "connection refused");
/// let err = root.context("OCSP request to http://ocsp.example.test/ failed");
///
/// assert_eq!(err.kind(), ErrorKind::CheckFailed);
/// assert_eq!(err.chain().count(), 2);
/// println!("{}", err.trace());
/// ```
#[derive(Debug)]
pub struct AuthError {
    kind: ErrorKind,
    stage: Option<Stage>,
    message: String,
    cause: Option<Box<AuthError>>,
}

impl AuthError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&AuthError> {
        self.cause.as_deref()
    }

    /// Attribute this error to a stage of the authentication flow
    pub fn in_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Wrap this error in a new outer error, keeping the failure category
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            stage: self.stage,
            message: message.into(),
            cause: Some(Box::new(self)),
        }
    }

    /// Attach an underlying error of possibly different category
    pub fn with_cause(mut self, cause: AuthError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterate over this error and its causes, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &AuthError> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// The innermost cause
    pub fn root_cause(&self) -> &AuthError {
        self.chain().last().unwrap_or(self)
    }

    /// Render the full cause chain, one cause per indented line
    ///
    /// ```text
    /// [signing] incorrect PIN (2 attempts remaining): signing the challenge failed
    ///   caused by: token rejected the PIN
    /// ```
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        for (depth, cause) in self.chain().skip(1).enumerate() {
            out.push('\n');
            out.push_str(&"  ".repeat(depth + 1));
            out.push_str("caused by: ");
            out.push_str(&cause.message);
        }
        out
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "[{stage}] ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
