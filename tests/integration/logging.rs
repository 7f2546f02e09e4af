//! Integration tests for structured logging

use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use utility_sync::auth::token::{IssuedToken, LoginExchange, TokenAuth};
use utility_sync::auth::{AuthError, Authenticator, TokenCache};
use utility_sync::clock::FixedClock;
use utility_sync::credentials::Credential;
use utility_sync::Provider;

/// Collects formatted log output
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

struct SecretExchange;

#[async_trait]
impl LoginExchange for SecretExchange {
    async fn login(&self, _credential: &Credential) -> Result<IssuedToken, AuthError> {
        Ok(IssuedToken {
            token: "bearer-do-not-log".to_string(),
            expires_at: None,
        })
    }
}

#[tokio::test]
async fn json_logs_carry_fields_but_no_secrets() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("debug"))
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = TempDir::new().unwrap();
    let credential = Credential::new(Provider::Hsv, "meter@example.com", "password-do-not-log", None);
    // Debug output of the credential is redacted as well
    tracing::debug!(credential = ?credential, "Loaded credential");

    let auth = TokenAuth::new(
        credential,
        Arc::new(SecretExchange),
        TokenCache::new(dir.path()),
        Arc::new(FixedClock::at_millis(1_735_257_600_000)),
    );
    auth.authenticate().await.unwrap();
    auth.authenticate().await.unwrap();

    let logs = capture.contents();
    assert!(logs.contains("Logging in"));
    assert!(logs.contains("Token cached"));
    assert!(logs.contains("\"provider\":\"hsv\""));
    assert!(!logs.contains("bearer-do-not-log"));
    assert!(!logs.contains("password-do-not-log"));

    for line in logs.lines() {
        let _: serde_json::Value = serde_json::from_str(line).unwrap();
    }
}
