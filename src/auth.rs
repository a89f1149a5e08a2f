use crate::{
    certificate::{Certificate, PersonalIdentity},
    context::AuthContext,
    crypto::{
        challenge::{generate_challenge, DigestAlgorithm},
        signature::verify_signature,
    },
    error::{AuthError, ErrorKind, Result, Stage},
    pin::PinSource,
    selection::{CertificateSelectionPolicy, DigitalSignaturePolicy},
    signer::TokenSigner,
    token::{Credential, Token},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};
use uuid::Uuid;

/// Where an authentication session stands
///
/// Sessions move strictly forward through
/// `Init → CertificateSelected → ChallengeGenerated → Signed →
/// SignatureVerified → Authenticated`. Any non-terminal state may end in
/// `Failed`, which records the category of the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    CertificateSelected,
    ChallengeGenerated,
    Signed,
    SignatureVerified,
    /// Revocation status confirmed good
    Authenticated,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Failed(_))
    }

    fn successor(&self) -> Option<SessionState> {
        match self {
            SessionState::Init => Some(SessionState::CertificateSelected),
            SessionState::CertificateSelected => Some(SessionState::ChallengeGenerated),
            SessionState::ChallengeGenerated => Some(SessionState::Signed),
            SessionState::Signed => Some(SessionState::SignatureVerified),
            SessionState::SignatureVerified => Some(SessionState::Authenticated),
            SessionState::Authenticated | SessionState::Failed(_) => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        match next {
            SessionState::Failed(_) => !self.is_terminal(),
            next => self.successor() == Some(next),
        }
    }
}

/// Result of a successful authentication
///
/// Identifies the holder by the verified certificate and carries the
/// evidence the decision was based on.
#[derive(Clone, Debug, Serialize)]
pub struct AuthResponse {
    pub session_id: Uuid,
    /// Subject of the authentication certificate (RFC 4514)
    pub subject: String,
    pub identity: Option<PersonalIdentity>,
    /// Certificate serial number, upper-case hex
    pub certificate_serial: String,
    pub issuer: String,
    pub digest_algorithm: DigestAlgorithm,
    /// Base64 challenge the token signed
    pub challenge: String,
    /// Base64 PKCS#1 v1.5 signature over the challenge
    pub signature: String,
    /// When the OCSP responder produced the `good` verdict
    pub revocation_checked_at: DateTime<Utc>,
    pub authenticated_at: DateTime<Utc>,
}

/// How a session ended, with every state it passed through
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub history: Vec<SessionState>,
    pub result: Result<AuthResponse>,
}

impl SessionOutcome {
    /// Final state of the session
    pub fn state(&self) -> SessionState {
        self.history.last().copied().unwrap_or(SessionState::Init)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Whether the session passed through `state`
    pub fn reached(&self, state: SessionState) -> bool {
        self.history.contains(&state)
    }

    /// 0 when authenticated, otherwise the failure category's code
    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }

    pub fn into_result(self) -> Result<AuthResponse> {
        self.result
    }
}

/// Receives a start and an outcome notice for every stage of a session
///
/// For operator visibility only; implementations must not influence the
/// authentication decision.
pub trait Transcript {
    fn stage_started(&mut self, _stage: Stage) {}

    fn stage_finished(&mut self, _stage: Stage, _outcome: std::result::Result<(), &AuthError>) {}
}

/// Transcript that reports nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTranscript;

impl Transcript for NoTranscript {}

/// Writes "Selecting a certificate... Done" style lines
pub struct ConsoleTranscript<W: Write = io::Stdout> {
    out: W,
}

impl ConsoleTranscript {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleTranscript<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn transcript_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Context => "Initializing",
        Stage::CertificateSelection => "Selecting a certificate",
        Stage::ChallengeGeneration => "Generating a challenge",
        Stage::Signing => "Signing the challenge",
        Stage::Verification => "Verifying the signature",
        Stage::Revocation => "Checking certificate validity via OCSP",
    }
}

impl<W: Write> Transcript for ConsoleTranscript<W> {
    // transcript output is best effort, a closed stdout must not fail the session
    fn stage_started(&mut self, stage: Stage) {
        let _ = write!(self.out, "{}... ", transcript_label(stage));
        let _ = self.out.flush();
    }

    fn stage_finished(&mut self, stage: Stage, outcome: std::result::Result<(), &AuthError>) {
        let word = match (outcome, stage) {
            (Ok(()), Stage::Verification | Stage::Revocation) => "OK",
            (Ok(()), _) => "Done",
            (Err(_), _) => "Failed",
        };
        let _ = writeln!(self.out, "{word}");
    }
}

struct Session {
    id: Uuid,
    history: Vec<SessionState>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: vec![SessionState::Init],
        }
    }

    fn state(&self) -> SessionState {
        self.history.last().copied().unwrap_or(SessionState::Init)
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state().can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state(),
            next
        );
        tracing::debug!(from = ?self.state(), to = ?next, "session state");
        self.history.push(next);
    }
}

/// Runs one stage: transcript notices, a tracing span and error attribution
fn run_stage<R>(
    transcript: &mut dyn Transcript,
    stage: Stage,
    f: impl FnOnce() -> Result<R>,
) -> Result<R> {
    transcript.stage_started(stage);
    let _span = tracing::debug_span!("stage", stage = stage.name()).entered();
    let result = f().map_err(|e| e.context(format!("{stage} failed")).in_stage(stage));
    transcript.stage_finished(stage, result.as_ref().map(|_| ()));
    result
}

/// Session orchestrator for eID challenge-response authentication
///
/// Sequences certificate selection, challenge generation, signing,
/// signature verification and the revocation check. The first failing stage
/// ends the session; there is no retry beyond the PIN re-prompts the signer
/// performs itself. The token is owned for the whole session and released
/// on every exit path.
///
/// The PIN source and the certificate selection policy are chosen at
/// construction, so a console prompt can be swapped for a scripted or
/// non-interactive source without touching the flow.
pub struct Authenticator<'ctx, P: PinSource, S: CertificateSelectionPolicy = DigitalSignaturePolicy> {
    context: &'ctx AuthContext,
    signer: TokenSigner<P>,
    policy: S,
    transcript: Box<dyn Transcript + 'ctx>,
}

impl<'ctx, P: PinSource> Authenticator<'ctx, P> {
    /// Create an authenticator selecting by the digital-signature key usage
    ///
    /// # Arguments
    /// * `context` - Loaded configuration, responder trust and transport
    /// * `pin_source` - Where PINs come from
    ///
    /// # Example
    /// ```rust,no_run
    /// use eid_auth::{AuthConfig, AuthContext, AuthError, Authenticator, ConsolePinSource, ErrorKind, SoftToken};
    /// use std::path::Path;
    ///
    /// let config = AuthConfig::load(Path::new("eid-auth.toml"))?;
    /// let token_config = config
    ///     .token
    ///     .clone()
    ///     .ok_or_else(|| AuthError::new(ErrorKind::Config, "no token configured"))?;
    /// let token = SoftToken::from_files(
    ///     token_config.label,
    ///     &token_config.private_key,
    ///     token_config.certificates.as_slice(),
    /// )?;
    ///
    /// let context = AuthContext::init(config)?;
    /// let mut authenticator = Authenticator::new(&context, ConsolePinSource);
    /// let outcome = authenticator.authenticate(token);
    /// println!("session ended in {:?}", outcome.state());
    /// # Ok::<(), eid_auth::AuthError>(())
    /// ```
    pub fn new(context: &'ctx AuthContext, pin_source: P) -> Self {
        Self {
            context,
            signer: TokenSigner::new(pin_source)
                .with_max_attempts(context.config().pin_attempts),
            policy: DigitalSignaturePolicy,
            transcript: Box::new(NoTranscript),
        }
    }
}

impl<'ctx, P: PinSource, S: CertificateSelectionPolicy> Authenticator<'ctx, P, S> {
    /// Replace the certificate selection policy
    pub fn with_policy<S2: CertificateSelectionPolicy>(self, policy: S2) -> Authenticator<'ctx, P, S2> {
        Authenticator {
            context: self.context,
            signer: self.signer,
            policy,
            transcript: self.transcript,
        }
    }

    pub fn with_transcript(mut self, transcript: impl Transcript + 'ctx) -> Self {
        self.transcript = Box::new(transcript);
        self
    }

    /// Authenticate the holder of `token`
    ///
    /// # Arguments
    /// * `token` - Token to authenticate with; owned and released by the session
    ///
    /// # Returns
    /// A [`SessionOutcome`] ending in `Authenticated` with the holder's
    /// identity, or in `Failed` with the full cause chain.
    ///
    /// # Errors
    /// Carried inside the outcome, attributed to the failing stage:
    /// - `NoUsableCertificate` - No certificate has the digital-signature bit
    /// - `Entropy` - No challenge could be generated
    /// - `PinCancelled` / `PinIncorrect` / `Token` - Signing failed
    /// - `SignatureInvalid` / `UnsupportedKeyType` / `Protocol` - Verification failed
    /// - `Revoked` / `CheckFailed` - Revocation status is not `good`
    pub fn authenticate<T: Token>(&mut self, token: T) -> SessionOutcome {
        let mut session = Session::new();
        let span = tracing::info_span!("session", id = %session.id, token = %token.label());
        let _entered = span.enter();

        let mut credential = Credential::acquire(token);
        let result = self.run(&mut session, &mut credential);
        credential.release();

        match &result {
            Ok(response) => {
                tracing::info!(subject = %response.subject, "authenticated");
            }
            Err(e) => {
                session.advance(SessionState::Failed(e.kind()));
                tracing::warn!(error = %e, exit_code = e.exit_code(), "authentication failed");
            }
        }

        SessionOutcome {
            session_id: session.id,
            history: session.history,
            result,
        }
    }

    fn run<T: Token>(
        &mut self,
        session: &mut Session,
        credential: &mut Credential<T>,
    ) -> Result<AuthResponse> {
        let transcript = self.transcript.as_mut();
        let policy = &self.policy;
        let signer = &mut self.signer;
        let context = self.context;

        let certificate: Certificate = run_stage(transcript, Stage::CertificateSelection, || {
            let candidates = credential.token_mut().enumerate_certificates()?;
            tracing::debug!(count = candidates.len(), "certificates on token");
            policy.select(candidates)
        })?;
        session.advance(SessionState::CertificateSelected);

        let challenge = run_stage(transcript, Stage::ChallengeGeneration, || {
            generate_challenge(context.config().digest_algorithm)
        })?;
        session.advance(SessionState::ChallengeGenerated);

        let signature = run_stage(transcript, Stage::Signing, || {
            signer.sign(&challenge, credential, &certificate)
        })?;
        session.advance(SessionState::Signed);

        run_stage(transcript, Stage::Verification, || {
            verify_signature(&challenge, &signature, &certificate)
        })?;
        session.advance(SessionState::SignatureVerified);

        let revocation_checked_at = run_stage(transcript, Stage::Revocation, || {
            context
                .revocation_checker()
                .check_status(&certificate)
                .into_result()
        })?;
        session.advance(SessionState::Authenticated);

        Ok(AuthResponse {
            session_id: session.id,
            subject: certificate.subject(),
            identity: certificate.identity(),
            certificate_serial: certificate.serial_hex(),
            issuer: certificate.issuer(),
            digest_algorithm: challenge.algorithm(),
            challenge: challenge.to_base64(),
            signature: signature.to_base64(),
            revocation_checked_at,
            authenticated_at: Utc::now(),
        })
    }
}
