//! Integration tests for session-token authentication and the token cache

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use utility_sync::auth::cache::{CachedToken, HSV_TOKEN_KEY};
use utility_sync::auth::token::{IssuedToken, LoginExchange, TokenAuth};
use utility_sync::auth::{AuthError, Authenticator, TokenCache};
use utility_sync::clock::{Clock, FixedClock};
use utility_sync::credentials::Credential;
use utility_sync::Provider;

const NOW: i64 = 1735257600000;

/// Hands out numbered tokens valid for one hour after `clock`'s now
struct CountingExchange {
    calls: AtomicUsize,
    clock: Arc<FixedClock>,
    reject: bool,
}

#[async_trait]
impl LoginExchange for CountingExchange {
    async fn login(&self, _credential: &Credential) -> Result<IssuedToken, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(AuthError::InvalidCredentials {
                provider: Provider::Hsv,
                reason: "bad password".to_string(),
            });
        }
        Ok(IssuedToken {
            token: format!("token-{n}"),
            expires_at: Some(self.clock.now() + Duration::hours(1)),
        })
    }
}

fn credential() -> Credential {
    Credential::new(Provider::Hsv, "meter@example.com", "hunter2", None)
}

fn setup(dir: &TempDir, reject: bool) -> (TokenAuth, Arc<CountingExchange>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::at_millis(NOW));
    let exchange = Arc::new(CountingExchange {
        calls: AtomicUsize::new(0),
        clock: clock.clone(),
        reject,
    });
    let auth = TokenAuth::new(
        credential(),
        exchange.clone(),
        TokenCache::new(dir.path()),
        clock.clone(),
    );
    (auth, exchange, clock)
}

#[tokio::test]
async fn second_authenticate_within_validity_skips_login() {
    let dir = TempDir::new().unwrap();
    let (auth, exchange, _clock) = setup(&dir, false);

    let first = auth.authenticate().await.unwrap();
    let second = auth.authenticate().await.unwrap();

    assert_eq!(first.value, "token-1");
    assert_eq!(second.value, "token-1");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_token_survives_a_new_authenticator() {
    let dir = TempDir::new().unwrap();
    let (auth, exchange, _clock) = setup(&dir, false);
    auth.authenticate().await.unwrap();

    // A later run loads the token from disk
    let (next_run, next_exchange, _clock) = setup(&dir, false);
    assert_eq!(next_run.authenticate().await.unwrap().value, "token-1");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    assert_eq!(next_exchange.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_token_triggers_exactly_one_login() {
    let dir = TempDir::new().unwrap();
    let (auth, exchange, clock) = setup(&dir, false);
    auth.authenticate().await.unwrap();

    clock.advance(Duration::hours(2));
    let renewed = auth.authenticate().await.unwrap();
    assert_eq!(renewed.value, "token-2");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);

    let cached = TokenCache::new(dir.path()).load(HSV_TOKEN_KEY).unwrap();
    assert_eq!(cached.token, "token-2");
}

#[tokio::test]
async fn token_inside_safety_margin_is_renewed() {
    let dir = TempDir::new().unwrap();
    let (auth, exchange, clock) = setup(&dir, false);
    auth.authenticate().await.unwrap();

    // 30 seconds before expiry is inside the default 60 second margin
    clock.advance(Duration::minutes(59) + Duration::seconds(30));
    auth.authenticate().await.unwrap();
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidate_forces_fresh_login() {
    let dir = TempDir::new().unwrap();
    let (auth, exchange, _clock) = setup(&dir, false);
    auth.authenticate().await.unwrap();

    auth.invalidate().await.unwrap();
    assert!(TokenCache::new(dir.path()).load(HSV_TOKEN_KEY).is_none());

    assert_eq!(auth.authenticate().await.unwrap().value, "token-2");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_credentials_leave_cache_empty() {
    let dir = TempDir::new().unwrap();
    let (auth, _exchange, _clock) = setup(&dir, true);

    let result = auth.authenticate().await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials { .. })));
    assert!(!TokenCache::new(dir.path()).path_for(HSV_TOKEN_KEY).exists());
}

#[tokio::test]
async fn corrupt_cache_file_degrades_to_login() {
    let dir = TempDir::new().unwrap();
    let cache = TokenCache::new(dir.path());
    std::fs::write(cache.path_for(HSV_TOKEN_KEY), "{\"provider\": \"hsv\", \"tok").unwrap();

    let (auth, exchange, _clock) = setup(&dir, false);
    assert_eq!(auth.authenticate().await.unwrap().value, "token-1");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cache_file_round_trips_with_expected_fields() {
    let dir = TempDir::new().unwrap();
    let cache = TokenCache::new(dir.path());
    let issued_at = DateTime::<Utc>::from_timestamp_millis(NOW).unwrap();
    let token = CachedToken {
        provider: Provider::Hsv,
        token: "abc".to_string(),
        issued_at,
        expires_at: Some(issued_at + Duration::hours(1)),
    };
    cache.save(HSV_TOKEN_KEY, &token).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(cache.path_for(HSV_TOKEN_KEY)).unwrap())
            .unwrap();
    assert_eq!(raw["provider"], "hsv");
    assert_eq!(raw["token"], "abc");
    assert!(raw.get("issued_at").is_some());
    assert!(raw.get("expires_at").is_some());

    assert_eq!(cache.load(HSV_TOKEN_KEY), Some(token));
    assert!(cache.clear(HSV_TOKEN_KEY).unwrap());
    assert!(!cache.clear(HSV_TOKEN_KEY).unwrap());
}
