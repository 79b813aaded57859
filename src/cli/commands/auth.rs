//! Arguments for the signing and encryption keys.

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretSlice;

pub const ARG_TOKEN_KEY: &str = "token-key";
pub const ARG_TOTP_KEY: &str = "totp-key";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_SESSION_TTL_HOURS: &str = "session-ttl-hours";

const TOTP_KEY_LEN: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_KEY)
                .long(ARG_TOKEN_KEY)
                .help("Session token signing key, at least 32 bytes")
                .env("MUSTER_TOKEN_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOTP_KEY)
                .long(ARG_TOTP_KEY)
                .help("Base64-encoded 32-byte key for TOTP secret encryption, independent of the token key")
                .env("MUSTER_TOTP_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("MUSTER_TOTP_ISSUER")
                .default_value("Muster"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_HOURS)
                .long(ARG_SESSION_TTL_HOURS)
                .help("Session token lifetime in hours")
                .env("MUSTER_SESSION_TTL_HOURS")
                .default_value("8")
                .value_parser(clap::value_parser!(i64).range(1..=168)),
        )
}

pub struct Options {
    pub token_key: SecretSlice<u8>,
    pub totp_key: SecretSlice<u8>,
    pub totp_issuer: String,
    pub session_ttl_hours: i64,
}

impl Options {
    /// # Errors
    /// Returns an error when a key is missing or malformed. Startup stops
    /// there; there is no degraded fallback.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_key = matches
            .get_one::<String>(ARG_TOKEN_KEY)
            .context("missing required argument: --token-key")?;

        let totp_key_b64 = matches
            .get_one::<String>(ARG_TOTP_KEY)
            .context("missing required argument: --totp-key")?;
        let totp_key = STANDARD
            .decode(totp_key_b64)
            .context("--totp-key is not valid base64")?;
        if totp_key.len() != TOTP_KEY_LEN {
            return Err(anyhow!(
                "--totp-key must decode to exactly {TOTP_KEY_LEN} bytes, got {}",
                totp_key.len()
            ));
        }

        let totp_issuer = matches
            .get_one::<String>(ARG_TOTP_ISSUER)
            .cloned()
            .unwrap_or_else(|| "Muster".to_string());
        let session_ttl_hours = matches
            .get_one::<i64>(ARG_SESSION_TTL_HOURS)
            .copied()
            .unwrap_or(8);

        Ok(Self {
            token_key: SecretSlice::from(token_key.as_bytes().to_vec()),
            totp_key: SecretSlice::from(totp_key),
            totp_issuer,
            session_ttl_hours,
        })
    }
}
