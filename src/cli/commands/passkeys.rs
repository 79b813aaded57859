//! Arguments for the passkey relying party.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_RP_ID: &str = "passkey-rp-id";
pub const ARG_RP_NAME: &str = "passkey-rp-name";
pub const ARG_ORIGIN: &str = "passkey-origin";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RP_ID)
                .long(ARG_RP_ID)
                .help("Relying-party id, usually the bare domain members visit")
                .env("MUSTER_PASSKEY_RP_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_RP_NAME)
                .long(ARG_RP_NAME)
                .help("Relying-party name shown by authenticators")
                .env("MUSTER_PASSKEY_RP_NAME")
                .default_value("Muster"),
        )
        .arg(
            Arg::new(ARG_ORIGIN)
                .long(ARG_ORIGIN)
                .help("Origin the browser reports during ceremonies, e.g. https://members.example.com")
                .env("MUSTER_PASSKEY_ORIGIN")
                .required(true),
        )
}

pub struct Options {
    pub rp_id: String,
    pub rp_name: String,
    pub origin: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let rp_id = matches
            .get_one::<String>(ARG_RP_ID)
            .cloned()
            .context("missing required argument: --passkey-rp-id")?;
        let rp_name = matches
            .get_one::<String>(ARG_RP_NAME)
            .cloned()
            .unwrap_or_else(|| "Muster".to_string());
        let origin = matches
            .get_one::<String>(ARG_ORIGIN)
            .cloned()
            .context("missing required argument: --passkey-origin")?;

        Ok(Self {
            rp_id,
            rp_name,
            origin,
        })
    }
}
