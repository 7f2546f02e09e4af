//! Integration tests for the interactive session login (thermostat vendor)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use utility_sync::auth::cache::{ECOBEE_SESSION_KEY, ECOBEE_TOKEN_KEY};
use utility_sync::auth::session::{
    DeriveOutcome, InteractiveSessionAuth, LoginStep, LoginSurface, MfaChallenge, MfaOutcome,
    SessionGrant, TokenGrant,
};
use utility_sync::auth::totp::TotpGenerator;
use utility_sync::auth::{AuthError, Authenticator, TokenCache};
use utility_sync::clock::FixedClock;
use utility_sync::credentials::Credential;
use utility_sync::Provider;

const NOW: i64 = 1735257600000;

/// Scripted vendor login page
#[derive(Default)]
struct FakeSurface {
    logins: AtomicUsize,
    derives: AtomicUsize,
    /// MFA codes seen, in order
    codes: Mutex<Vec<String>>,
    /// Codes accepted by the MFA step
    accepted_codes: Vec<String>,
    /// Whether the stored session still works
    session_alive: bool,
    require_mfa: bool,
    reject_password: bool,
    /// Number of credential submissions that never answer
    hang_logins: usize,
}

#[async_trait]
impl LoginSurface for FakeSurface {
    async fn submit_credentials(&self, _username: &str, password: &str) -> Result<LoginStep, AuthError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.hang_logins {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if self.reject_password || password.is_empty() {
            return Ok(LoginStep::Rejected("wrong password".to_string()));
        }
        if self.require_mfa {
            return Ok(LoginStep::MfaRequired(MfaChallenge("challenge-1".to_string())));
        }
        Ok(LoginStep::Established(SessionGrant {
            session: "session-cookies".to_string(),
            token: Some(TokenGrant {
                access_token: "login-token".to_string(),
                expires_in: Some(3600),
            }),
        }))
    }

    async fn submit_mfa(&self, _challenge: &MfaChallenge, code: &str) -> Result<MfaOutcome, AuthError> {
        self.codes.lock().unwrap().push(code.to_string());
        if self.accepted_codes.iter().any(|c| c == code) {
            Ok(MfaOutcome::Established(SessionGrant {
                session: "session-cookies".to_string(),
                token: None,
            }))
        } else {
            Ok(MfaOutcome::Rejected("invalid code".to_string()))
        }
    }

    async fn derive_token(&self, session: &str) -> Result<DeriveOutcome, AuthError> {
        let n = self.derives.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.session_alive && self.logins.load(Ordering::SeqCst) == 0 {
            return Ok(DeriveOutcome::SessionExpired);
        }
        assert_eq!(session, "session-cookies");
        Ok(DeriveOutcome::Token(TokenGrant {
            access_token: format!("derived-{n}"),
            expires_in: Some(3600),
        }))
    }
}

/// Code is the 30-second step number, so consecutive steps differ
struct StepTotp;

impl TotpGenerator for StepTotp {
    fn code_at(&self, _secret: &str, time: DateTime<Utc>) -> Result<String, AuthError> {
        Ok(format!("{:06}", time.timestamp() / 30 % 1_000_000))
    }
}

fn code_for(millis: i64) -> String {
    format!("{:06}", millis / 1000 / 30 % 1_000_000)
}

fn auth(dir: &TempDir, surface: Arc<FakeSurface>, clock: Arc<FixedClock>) -> InteractiveSessionAuth {
    InteractiveSessionAuth::new(
        Credential::new(
            Provider::Ecobee,
            "me@example.com",
            "hunter2",
            Some("JBSWY3DPEHPK3PXP".to_string()),
        ),
        surface,
        Arc::new(StepTotp),
        TokenCache::new(dir.path()),
        clock,
    )
}

#[tokio::test]
async fn login_without_mfa_caches_session_and_token() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface::default());
    let clock = Arc::new(FixedClock::at_millis(NOW));
    let auth = auth(&dir, surface.clone(), clock);

    assert_eq!(auth.authenticate().await.unwrap().value, "login-token");
    assert_eq!(auth.authenticate().await.unwrap().value, "login-token");
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);

    let cache = TokenCache::new(dir.path());
    let session = cache.load(ECOBEE_SESSION_KEY).unwrap();
    assert_eq!(session.token, "session-cookies");
    assert!(session.expires_at.is_none());
    assert!(cache.load(ECOBEE_TOKEN_KEY).unwrap().expires_at.is_some());
}

#[tokio::test]
async fn expired_token_is_reissued_from_session_without_mfa() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        require_mfa: true,
        accepted_codes: vec![code_for(NOW)],
        session_alive: true,
        ..Default::default()
    });
    let clock = Arc::new(FixedClock::at_millis(NOW));
    let auth = auth(&dir, surface.clone(), clock.clone());

    // First login answers MFA, then derives a token from the new session
    assert_eq!(auth.authenticate().await.unwrap().value, "derived-1");
    assert_eq!(surface.codes.lock().unwrap().len(), 1);

    clock.advance(Duration::hours(2));
    assert_eq!(auth.authenticate().await.unwrap().value, "derived-2");
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);
    assert_eq!(surface.codes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_mfa_code_is_retried_once_with_next_step() {
    let dir = TempDir::new().unwrap();
    let next_step = code_for(NOW + 30_000);
    let surface = Arc::new(FakeSurface {
        require_mfa: true,
        accepted_codes: vec![next_step.clone()],
        session_alive: true,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)));

    auth.authenticate().await.unwrap();
    assert_eq!(*surface.codes.lock().unwrap(), vec![code_for(NOW), next_step]);
}

#[tokio::test]
async fn second_mfa_rejection_fails() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        require_mfa: true,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)));

    let result = auth.authenticate().await;
    assert!(matches!(result, Err(AuthError::MfaRejected { attempts: 2 })));
    assert_eq!(surface.codes.lock().unwrap().len(), 2);
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);
    assert!(TokenCache::new(dir.path()).load(ECOBEE_SESSION_KEY).is_none());
}

#[tokio::test]
async fn rejected_password_is_an_auth_failure() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        reject_password: true,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)));

    assert!(matches!(
        auth.authenticate().await,
        Err(AuthError::InvalidCredentials {
            provider: Provider::Ecobee,
            ..
        })
    ));
    // Rejections are final, never attempted again
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_session_falls_back_to_interactive_login() {
    let dir = TempDir::new().unwrap();
    let cache = TokenCache::new(dir.path());
    cache
        .save(
            ECOBEE_SESSION_KEY,
            &utility_sync::auth::CachedToken {
                provider: Provider::Ecobee,
                token: "stale-session".to_string(),
                issued_at: DateTime::<Utc>::from_timestamp_millis(NOW).unwrap(),
                expires_at: None,
            },
        )
        .unwrap();

    let surface = Arc::new(FakeSurface::default());
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)));

    assert_eq!(auth.authenticate().await.unwrap().value, "login-token");
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);
    assert_eq!(
        cache.load(ECOBEE_SESSION_KEY).unwrap().token,
        "session-cookies"
    );
}

#[tokio::test]
async fn hung_login_is_retried_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        hang_logins: 1,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)))
        .with_login_timeout(std::time::Duration::from_millis(50))
        .with_max_retries(2);

    assert_eq!(auth.authenticate().await.unwrap().value, "login-token");
    assert_eq!(surface.logins.load(Ordering::SeqCst), 2);
    assert!(TokenCache::new(dir.path()).load(ECOBEE_SESSION_KEY).is_some());
}

#[tokio::test]
async fn login_that_keeps_hanging_times_out_after_retries() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        hang_logins: usize::MAX,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)))
        .with_login_timeout(std::time::Duration::from_millis(50))
        .with_max_retries(1);

    let result = auth.authenticate().await;
    assert!(matches!(result, Err(AuthError::LoginTimeout(_))));
    assert!(result.unwrap_err().is_transient());
    assert_eq!(surface.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidate_keeps_the_session() {
    let dir = TempDir::new().unwrap();
    let surface = Arc::new(FakeSurface {
        session_alive: true,
        ..Default::default()
    });
    let auth = auth(&dir, surface.clone(), Arc::new(FixedClock::at_millis(NOW)));
    auth.authenticate().await.unwrap();

    auth.invalidate().await.unwrap();
    let cache = TokenCache::new(dir.path());
    assert!(cache.load(ECOBEE_TOKEN_KEY).is_none());
    assert!(cache.load(ECOBEE_SESSION_KEY).is_some());

    // Next call derives from the session instead of logging in again
    assert_eq!(auth.authenticate().await.unwrap().value, "derived-1");
    assert_eq!(surface.logins.load(Ordering::SeqCst), 1);
}
