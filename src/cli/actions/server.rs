use anyhow::{Context, Result};
use secrecy::SecretSlice;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};

use crate::api::{self, AppState};
use crate::attempts::{AttemptGuard, GuardConfig, PgAttemptStore};
use crate::auth::AuthFlow;
use crate::directory::PgDirectory;
use crate::geo::{GeoGate, PgGeoResolver, PgGeoRuleStore};
use crate::passkeys::{CeremonyConfig, PasskeyService, PgPasskeyRepo};
use crate::sessions::PgSessionStore;
use crate::token::TokenService;
use crate::totp::{PgTotpRepo, TotpService};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub token_key: SecretSlice<u8>,
    pub totp_key: SecretSlice<u8>,
    pub totp_issuer: String,
    pub session_ttl_hours: i64,
    pub passkey_rp_id: String,
    pub passkey_rp_name: String,
    pub passkey_origin: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, a key is invalid, or
/// the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(pool.clone()));

    let guard = Arc::new(AttemptGuard::new(
        Arc::new(PgAttemptStore::new(pool.clone())),
        GuardConfig::default(),
    ));
    let geo = Arc::new(GeoGate::new(
        Arc::new(PgGeoResolver::new(pool.clone())),
        Arc::new(PgGeoRuleStore::new(pool.clone())),
    ));

    let totp = Arc::new(TotpService::new(
        Arc::new(PgTotpRepo::new(pool.clone())),
        directory.clone(),
        args.totp_key,
        args.totp_issuer,
    )?);

    let tokens = Arc::new(
        TokenService::new(&args.token_key, sessions.clone())?
            .with_ttl(chrono::Duration::hours(args.session_ttl_hours)),
    );

    let passkeys = Arc::new(PasskeyService::new(
        CeremonyConfig::new(
            &args.passkey_rp_id,
            &args.passkey_rp_name,
            &args.passkey_origin,
        )?,
        Arc::new(PgPasskeyRepo::new(pool.clone())),
        directory.clone(),
    )?);

    let flow = AuthFlow::new(
        directory.clone(),
        guard,
        geo,
        totp.clone(),
        tokens.clone(),
    );

    let state = Arc::new(AppState {
        flow,
        tokens,
        totp,
        passkeys,
        sessions,
        directory,
    });

    api::serve(args.port, state, pool, &args.frontend_base_url).await
}
