use clap::Parser;
use eid_auth::{
    AuthConfig, AuthContext, AuthError, Authenticator, ConsolePinSource, ConsoleTranscript,
    ErrorKind, PinSource, Result, SecretPinSource, SessionOutcome, SoftToken,
};
use std::{io, path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `EID_AUTH_LOG=eid_auth=debug`
const LOG_ENV: &str = "EID_AUTH_LOG";

/// Authenticate an eID card holder by signing a fresh challenge
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "eid-auth.toml")]
    config: PathBuf,
    /// Read the PIN from this environment variable instead of prompting
    #[arg(long, value_name = "VAR")]
    pin_env: Option<String>,
    /// Do not print the stage transcript
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
    /// Print the authentication result as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.trace());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(args: &Args) -> Result<u8> {
    let config = AuthConfig::load(&args.config)?;
    let token = open_token(&config)?;
    let context = AuthContext::init(config)?;

    let outcome = match &args.pin_env {
        Some(var) => authenticate(&context, SecretPinSource::from_env(var)?, token, args),
        None => authenticate(&context, ConsolePinSource, token, args),
    };

    let code = outcome.exit_code();
    match outcome.into_result() {
        Ok(response) if args.json => {
            let json = serde_json::to_string_pretty(&response).map_err(|e| {
                AuthError::new(ErrorKind::Io, format!("cannot serialize result: {e}"))
            })?;
            println!("{json}");
        }
        Ok(response) => println!("Successfully authenticated {}.", response.subject),
        Err(e) => eprintln!("{}", e.trace()),
    }
    Ok(code)
}

fn open_token(config: &AuthConfig) -> Result<SoftToken> {
    let token = config.token.as_ref().ok_or_else(|| {
        AuthError::new(
            ErrorKind::Config,
            "no [token] configured and this build has no hardware token backend",
        )
    })?;
    SoftToken::from_files(
        token.label.clone(),
        &token.private_key,
        token.certificates.as_slice(),
    )
}

fn authenticate<P: PinSource>(
    context: &AuthContext,
    pin_source: P,
    token: SoftToken,
    args: &Args,
) -> SessionOutcome {
    let authenticator = Authenticator::new(context, pin_source);
    let mut authenticator = if args.quiet {
        authenticator
    } else if args.json {
        // stdout carries the JSON document
        authenticator.with_transcript(ConsoleTranscript::new(io::stderr()))
    } else {
        authenticator.with_transcript(ConsoleTranscript::stdout())
    };
    authenticator.authenticate(token)
}
