//! Login orchestration.
//!
//! One login walks: geo gate, attempt guard, primary credential, then
//! optionally a second factor, before a token is minted and its session
//! registered. Every failed step except the geo gate records a failure in
//! the attempt guard; a success clears the username's records.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{info, warn};

use crate::attempts::AttemptGuard;
use crate::auth::AuthError;
use crate::directory::{Subject, UserDirectory, verify_password};
use crate::geo::GeoGate;
use crate::token::{IssuedToken, TokenService};
use crate::totp::TotpService;

/// Outcome of the primary-credential step.
#[derive(Debug)]
pub enum LoginOutcome {
    Issued(IssuedToken),
    /// Password was correct but the account has 2FA enabled; the caller
    /// must present a TOTP or backup code before a token is issued.
    SecondFactorRequired,
}

/// The second credential presented at the 2FA step.
#[derive(Debug)]
pub enum SecondFactor<'a> {
    Totp(&'a str),
    BackupCode(&'a str),
}

pub struct AuthFlow {
    directory: Arc<dyn UserDirectory>,
    guard: Arc<AttemptGuard>,
    geo: Arc<GeoGate>,
    totp: Arc<TotpService>,
    tokens: Arc<TokenService>,
}

impl AuthFlow {
    #[must_use]
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        guard: Arc<AttemptGuard>,
        geo: Arc<GeoGate>,
        totp: Arc<TotpService>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            directory,
            guard,
            geo,
            totp,
            tokens,
        }
    }

    /// Verify the primary credential and either issue a token or demand a
    /// second factor.
    ///
    /// # Errors
    /// `GeoBlocked`, `LockedOut`, `InvalidCredentials`, or `Unavailable`
    /// when the directory itself is down.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        source_addr: Option<IpAddr>,
        device_name: Option<String>,
    ) -> Result<LoginOutcome, AuthError> {
        let addr = source_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        // Geo rejections are logged but never counted as credential
        // failures.
        if self.geo.is_blocked(addr).await {
            warn!(username, %addr, "login blocked by geo gate");
            return Err(AuthError::GeoBlocked);
        }

        if self.guard.is_locked_out(username, addr).await {
            return Err(AuthError::LockedOut);
        }

        let subject = self
            .directory
            .subject_by_username(username)
            .await
            .map_err(AuthError::Unavailable)?;
        let Some(subject) = subject else {
            self.guard.record_failure(username, addr).await;
            return Err(AuthError::InvalidCredentials);
        };

        let hash = self
            .directory
            .password_hash(subject.id)
            .await
            .map_err(AuthError::Unavailable)?;
        let password_ok = hash
            .as_deref()
            .map(|stored| verify_password(password, stored))
            .unwrap_or(false);
        if !password_ok {
            self.guard.record_failure(username, addr).await;
            return Err(AuthError::InvalidCredentials);
        }

        if subject.totp_enabled {
            // The guard is not cleared yet; a stolen password alone must
            // not reset the counters.
            return Ok(LoginOutcome::SecondFactorRequired);
        }

        let issued = self
            .issue_for_subject(&subject, source_addr, device_name)
            .await?;
        Ok(LoginOutcome::Issued(issued))
    }

    /// Complete a login for an account with 2FA enabled.
    ///
    /// # Errors
    /// Same taxonomy as [`login`](Self::login). A wrong code is
    /// `InvalidCredentials` regardless of which factor was presented.
    pub async fn verify_second_factor(
        &self,
        username: &str,
        factor: SecondFactor<'_>,
        source_addr: Option<IpAddr>,
        device_name: Option<String>,
    ) -> Result<IssuedToken, AuthError> {
        let addr = source_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        if self.geo.is_blocked(addr).await {
            warn!(username, %addr, "second factor blocked by geo gate");
            return Err(AuthError::GeoBlocked);
        }

        if self.guard.is_locked_out(username, addr).await {
            return Err(AuthError::LockedOut);
        }

        let subject = self
            .directory
            .subject_by_username(username)
            .await
            .map_err(AuthError::Unavailable)?;
        let Some(subject) = subject.filter(|s| s.totp_enabled) else {
            self.guard.record_failure(username, addr).await;
            return Err(AuthError::InvalidCredentials);
        };

        let accepted = match factor {
            SecondFactor::Totp(code) => self
                .totp
                .verify(subject.id, code)
                .await
                .map_err(AuthError::Unavailable)?,
            SecondFactor::BackupCode(code) => self
                .totp
                .verify_backup_code(subject.id, code)
                .await
                .map_err(AuthError::Unavailable)?,
        };
        if !accepted {
            self.guard.record_failure(username, addr).await;
            return Err(AuthError::InvalidCredentials);
        }

        self.issue_for_subject(&subject, source_addr, device_name)
            .await
    }

    /// Mint a token for an already-authenticated subject (password plus
    /// factor, or passkey assertion), register the session, and clear the
    /// attempt counters for the username.
    ///
    /// # Errors
    /// `Unavailable` when signing or session registration fails.
    pub async fn issue_for_subject(
        &self,
        subject: &Subject,
        source_addr: Option<IpAddr>,
        device_name: Option<String>,
    ) -> Result<IssuedToken, AuthError> {
        let issued = self
            .tokens
            .issue(subject, source_addr, device_name)
            .await
            .map_err(AuthError::Unavailable)?;

        self.guard.clear(&subject.username).await;
        info!(subject = %subject.id, jti = %issued.jti, "session issued");
        Ok(issued)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attempts::{GuardConfig, MemoryAttemptStore};
    use crate::directory::MemoryDirectory;
    use crate::geo::{GeoGate, GeoRule, GeoRuleKind, MemoryGeoRuleStore, StaticResolver};
    use crate::sessions::MemorySessionStore;
    use crate::token::Validated;
    use crate::totp::{EnrollmentOutcome, MemoryTotpRepo};
    use argon2::Argon2;
    use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};
    use secrecy::SecretSlice;
    use totp_rs::Secret;
    use uuid::Uuid;

    const PASSWORD: &str = "correct horse battery staple";

    fn hash(password: &str) -> String {
        Argon2::default()
            .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
            .unwrap()
            .to_string()
    }

    struct Fixture {
        flow: AuthFlow,
        totp: Arc<TotpService>,
        tokens: Arc<TokenService>,
        subject: Subject,
    }

    async fn fixture(totp_enabled: bool, geo: Option<GeoGate>) -> Fixture {
        let subject = Subject {
            id: Uuid::new_v4(),
            username: "coxswain".to_string(),
            role: "member".to_string(),
            totp_enabled,
        };
        let directory = Arc::new(MemoryDirectory::new());
        directory
            .add_member(subject.clone(), Some(hash(PASSWORD)), vec![])
            .await;

        let guard = Arc::new(AttemptGuard::new(
            Arc::new(MemoryAttemptStore::new()),
            GuardConfig::default(),
        ));
        let geo = Arc::new(geo.unwrap_or_else(|| {
            GeoGate::new(
                Arc::new(StaticResolver::empty()),
                Arc::new(MemoryGeoRuleStore::new(vec![])),
            )
        }));
        let totp = Arc::new(
            TotpService::new(
                Arc::new(MemoryTotpRepo::new()),
                directory.clone(),
                SecretSlice::from(vec![3u8; 32]),
                "Muster".to_string(),
            )
            .unwrap(),
        );
        let tokens = Arc::new(
            TokenService::new(
                &SecretSlice::from(vec![5u8; 48]),
                Arc::new(MemorySessionStore::new()),
            )
            .unwrap(),
        );

        let flow = AuthFlow::new(directory, guard, geo, totp.clone(), tokens.clone());
        Fixture {
            flow,
            totp,
            tokens,
            subject,
        }
    }

    #[tokio::test]
    async fn password_login_issues_a_valid_token() {
        let fx = fixture(false, None).await;
        let outcome = fx
            .flow
            .login("coxswain", PASSWORD, None, None)
            .await
            .unwrap();
        let LoginOutcome::Issued(issued) = outcome else {
            panic!("account without 2fa should get a token directly");
        };
        assert!(matches!(
            fx.tokens.validate(&issued.token).await.unwrap(),
            Validated::Valid(_)
        ));
    }

    #[tokio::test]
    async fn wrong_password_then_lockout() {
        let fx = fixture(false, None).await;
        let addr: IpAddr = "198.51.100.7".parse().unwrap();

        for _ in 0..5 {
            let err = fx
                .flow
                .login("coxswain", "wrong", Some(addr), None)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        // Threshold reached: even the right password is refused now.
        let err = fx
            .flow
            .login("coxswain", PASSWORD, Some(addr), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LockedOut));
    }

    #[tokio::test]
    async fn success_clears_prior_failures() {
        let fx = fixture(false, None).await;
        let addr: IpAddr = "198.51.100.7".parse().unwrap();

        for _ in 0..4 {
            let _ = fx.flow.login("coxswain", "wrong", Some(addr), None).await;
        }
        assert!(matches!(
            fx.flow
                .login("coxswain", PASSWORD, Some(addr), None)
                .await
                .unwrap(),
            LoginOutcome::Issued(_)
        ));

        // Counters were reset, so four more failures do not lock.
        for _ in 0..4 {
            let _ = fx.flow.login("coxswain", "wrong", Some(addr), None).await;
        }
        assert!(matches!(
            fx.flow
                .login("coxswain", PASSWORD, Some(addr), None)
                .await
                .unwrap(),
            LoginOutcome::Issued(_)
        ));
    }

    #[tokio::test]
    async fn unknown_username_is_generic_and_counted() {
        let fx = fixture(false, None).await;
        let addr: IpAddr = "198.51.100.8".parse().unwrap();

        // Spread failures across usernames so no single one trips the
        // per-username threshold while the address total climbs past ten.
        for username in ["ghost1", "ghost2", "ghost3"] {
            for _ in 0..4 {
                let err = fx
                    .flow
                    .login(username, "wrong", Some(addr), None)
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    AuthError::InvalidCredentials | AuthError::LockedOut
                ));
            }
        }
        // Address axis tripped, so a known username from the same address
        // is refused even with the right password.
        let err = fx
            .flow
            .login("coxswain", PASSWORD, Some(addr), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LockedOut));
    }

    #[tokio::test]
    async fn geo_block_is_not_counted_as_a_failure() {
        let addr: IpAddr = "203.0.113.9".parse().unwrap();
        let geo = GeoGate::new(
            Arc::new(StaticResolver::mapping([(addr, "ZZ")])),
            Arc::new(MemoryGeoRuleStore::new(vec![GeoRule {
                country: "ZZ".to_string(),
                rule: GeoRuleKind::Block,
            }])),
        );
        let fx = fixture(false, Some(geo)).await;

        for _ in 0..20 {
            let err = fx
                .flow
                .login("coxswain", PASSWORD, Some(addr), None)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::GeoBlocked));
        }
        // No counters accumulated: a permitted address logs straight in.
        assert!(matches!(
            fx.flow.login("coxswain", PASSWORD, None, None).await,
            Ok(LoginOutcome::Issued(_))
        ));
    }

    #[tokio::test]
    async fn second_factor_round_trip() {
        let fx = fixture(false, None).await;

        // Enroll, which flips totp_enabled in the directory.
        let start = fx.totp.begin_enrollment(&fx.subject).unwrap();
        let secret = Secret::Encoded(start.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = crate::totp::build_totp(secret, "Muster", &fx.subject.username).unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let code = totp.generate(now);
        let outcome = fx
            .totp
            .finish_enrollment(&fx.subject, &start.secret_base32, &code)
            .await
            .unwrap();
        let EnrollmentOutcome::Enabled { backup_codes } = outcome else {
            panic!("enrollment should succeed");
        };

        // Password alone no longer yields a token.
        assert!(matches!(
            fx.flow
                .login("coxswain", PASSWORD, None, None)
                .await
                .unwrap(),
            LoginOutcome::SecondFactorRequired
        ));

        // A wrong code is a generic credential failure.
        let err = fx
            .flow
            .verify_second_factor("coxswain", SecondFactor::Totp("000000"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // A fresh code completes the login.
        let code = totp.generate(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        );
        let issued = fx
            .flow
            .verify_second_factor("coxswain", SecondFactor::Totp(&code), None, None)
            .await
            .unwrap();
        assert!(matches!(
            fx.tokens.validate(&issued.token).await.unwrap(),
            Validated::Valid(_)
        ));

        // A backup code works exactly once.
        let backup = backup_codes.first().unwrap();
        fx.flow
            .verify_second_factor("coxswain", SecondFactor::BackupCode(backup), None, None)
            .await
            .unwrap();
        let err = fx
            .flow
            .verify_second_factor("coxswain", SecondFactor::BackupCode(backup), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}
