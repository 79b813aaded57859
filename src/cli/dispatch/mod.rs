//! Command-line argument dispatch and server initialization.
//!
//! Parses validated CLI arguments and maps them to the appropriate action,
//! such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, passkeys};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent. Key
/// material failures are fatal here, before anything listens.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:5173".to_string());

    let auth_opts = auth::Options::parse(matches)?;
    let passkey_opts = passkeys::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        token_key: auth_opts.token_key,
        totp_key: auth_opts.totp_key,
        totp_issuer: auth_opts.totp_issuer,
        session_ttl_hours: auth_opts.session_ttl_hours,
        passkey_rp_id: passkey_opts.rp_id,
        passkey_rp_name: passkey_opts.rp_name,
        passkey_origin: passkey_opts.origin,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totp_key_must_be_32_bytes_of_base64() {
        temp_env::with_vars(
            [
                ("MUSTER_DSN", Some("postgres://user@localhost:5432/muster")),
                (
                    "MUSTER_TOKEN_KEY",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                ("MUSTER_TOTP_KEY", Some("dG9vLXNob3J0")),
                ("MUSTER_PASSKEY_RP_ID", Some("members.example.com")),
                (
                    "MUSTER_PASSKEY_ORIGIN",
                    Some("https://members.example.com"),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["muster"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("32 bytes"));
                }
            },
        );
    }

    #[test]
    fn valid_env_builds_a_server_action() {
        temp_env::with_vars(
            [
                ("MUSTER_DSN", Some("postgres://user@localhost:5432/muster")),
                (
                    "MUSTER_TOKEN_KEY",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                (
                    "MUSTER_TOTP_KEY",
                    Some("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY="),
                ),
                ("MUSTER_PASSKEY_RP_ID", Some("members.example.com")),
                (
                    "MUSTER_PASSKEY_ORIGIN",
                    Some("https://members.example.com"),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["muster"]);
                let action = handler(&matches).expect("valid env should parse");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.passkey_rp_id, "members.example.com");
                assert_eq!(args.session_ttl_hours, 8);
            },
        );
    }
}
