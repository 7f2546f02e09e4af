//! Interactive session authentication (thermostat vendor)
//!
//! Two cache tiers: a long-lived browser session (`ecobee_session`, no known
//! expiry) and a short-lived API token (`ecobee_token`). The state machine is
//!
//! ```text
//! NoSession -> BrowserLogin{credentials, MFA} -> SessionEstablished -> TokenIssued
//! TokenIssued -> TokenExpired -> ReissueFromSession -> TokenIssued
//! ReissueFromSession -> SessionExpired -> BrowserLogin
//! ```
//!
//! The browser itself is driven through a [`LoginSurface`].

use super::cache::{CachedToken, TokenCache, ECOBEE_SESSION_KEY, ECOBEE_TOKEN_KEY};
use super::totp::{TotpGenerator, TOTP_STEP_SECS};
use super::{AccessToken, AuthError, Authenticator};
use crate::clock::SharedClock;
use crate::credentials::{Credential, ECOBEE_VARS};
use crate::sync::config::{calculate_backoff, LOGIN_TIMEOUT, MAX_RETRIES};
use crate::Provider;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Token lifetime assumed when the vendor does not report one
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Opaque MFA challenge handle returned by the login surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaChallenge(pub String);

/// API token handed out by the vendor
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds, if reported
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Established browser session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionGrant {
    /// Serialized session state, reusable without MFA
    pub session: String,
    /// API token captured during login, if any
    pub token: Option<TokenGrant>,
}

impl std::fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGrant")
            .field("session", &"<redacted>")
            .field("token", &self.token)
            .finish()
    }
}

/// Result of submitting username and password
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Logged in without MFA
    Established(SessionGrant),
    /// An MFA code is required
    MfaRequired(MfaChallenge),
    /// Credentials refused
    Rejected(String),
}

/// Result of submitting an MFA code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MfaOutcome {
    /// Code accepted
    Established(SessionGrant),
    /// Code refused
    Rejected(String),
}

/// Result of deriving a token from a stored session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeriveOutcome {
    /// Session still good
    Token(TokenGrant),
    /// Session no longer accepted by the vendor
    SessionExpired,
}

/// Interactive login surface (a browser driven from outside the process)
#[async_trait]
pub trait LoginSurface: Send + Sync {
    /// Submit username and password
    async fn submit_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginStep, AuthError>;

    /// Answer an MFA challenge
    async fn submit_mfa(&self, challenge: &MfaChallenge, code: &str)
        -> Result<MfaOutcome, AuthError>;

    /// Obtain an API token from a stored session without MFA
    async fn derive_token(&self, session: &str) -> Result<DeriveOutcome, AuthError>;
}

/// Authenticator for the browser login flow
pub struct InteractiveSessionAuth {
    credential: Credential,
    surface: Arc<dyn LoginSurface>,
    totp: Arc<dyn TotpGenerator>,
    cache: TokenCache,
    clock: SharedClock,
    login_timeout: std::time::Duration,
    max_retries: u32,
}

impl InteractiveSessionAuth {
    /// Create an interactive authenticator
    pub fn new(
        credential: Credential,
        surface: Arc<dyn LoginSurface>,
        totp: Arc<dyn TotpGenerator>,
        cache: TokenCache,
        clock: SharedClock,
    ) -> Self {
        Self {
            credential,
            surface,
            totp,
            cache,
            clock,
            login_timeout: LOGIN_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the overall interactive login budget
    pub fn with_login_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set how often a timed-out or transiently failed login is attempted again
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn store_token(&self, grant: TokenGrant) -> Result<AccessToken, AuthError> {
        let now = self.clock.now();
        let ttl = grant.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let cached = CachedToken {
            provider: Provider::Ecobee,
            token: grant.access_token,
            issued_at: now,
            expires_at: Some(now + Duration::seconds(ttl as i64)),
        };
        self.cache.save(ECOBEE_TOKEN_KEY, &cached)?;
        Ok(AccessToken::from(&cached))
    }

    /// Full browser login: credentials, MFA, session persistence, token
    async fn interactive_login(&self) -> Result<TokenGrant, AuthError> {
        info!("Starting interactive login");

        let step = self
            .surface
            .submit_credentials(self.credential.username(), self.credential.password())
            .await?;

        let session = match step {
            LoginStep::Established(session) => session,
            LoginStep::MfaRequired(challenge) => self.answer_mfa(&challenge).await?,
            LoginStep::Rejected(reason) => {
                return Err(AuthError::InvalidCredentials {
                    provider: Provider::Ecobee,
                    reason,
                })
            }
        };

        self.cache.save(
            ECOBEE_SESSION_KEY,
            &CachedToken {
                provider: Provider::Ecobee,
                token: session.session.clone(),
                issued_at: self.clock.now(),
                expires_at: None,
            },
        )?;
        info!("Session established");

        match session.token {
            Some(grant) => Ok(grant),
            None => match self.surface.derive_token(&session.session).await? {
                DeriveOutcome::Token(grant) => Ok(grant),
                DeriveOutcome::SessionExpired => Err(AuthError::SessionUnavailable),
            },
        }
    }

    /// Interactive login, each attempt bounded by the login timeout
    ///
    /// Timeouts and transient network failures are attempted again with
    /// exponential backoff; rejected credentials or MFA codes are final.
    async fn login_with_retries(&self) -> Result<TokenGrant, AuthError> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.login_timeout, self.interactive_login())
                .await
                .unwrap_or(Err(AuthError::LoginTimeout(self.login_timeout)));

            match result {
                Ok(grant) => {
                    if attempt > 1 {
                        info!(attempt, "Interactive login succeeded after retry");
                    }
                    return Ok(grant);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = calculate_backoff(attempt - 1);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        backoff_secs = backoff.as_secs_f64(),
                        "Interactive login failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit the current code, retrying once with a recomputed code
    async fn answer_mfa(&self, challenge: &MfaChallenge) -> Result<SessionGrant, AuthError> {
        let secret = self
            .credential
            .totp_secret()
            .ok_or(AuthError::MissingCredential(
                ECOBEE_VARS.totp_secret.unwrap_or("ECOBEE_TOTP_SECRET"),
            ))?;

        let first = self.totp.code_at(secret, self.clock.now())?;
        match self.surface.submit_mfa(challenge, &first).await? {
            MfaOutcome::Established(session) => return Ok(session),
            MfaOutcome::Rejected(reason) => {
                warn!(%reason, "MFA code rejected, retrying once");
            }
        }

        let now = self.clock.now();
        let mut second = self.totp.code_at(secret, now)?;
        if second == first {
            // Same step as the rejected code; assume the vendor's clock runs ahead
            second = self
                .totp
                .code_at(secret, now + Duration::seconds(TOTP_STEP_SECS as i64))?;
        }

        match self.surface.submit_mfa(challenge, &second).await? {
            MfaOutcome::Established(session) => Ok(session),
            MfaOutcome::Rejected(reason) => {
                warn!(%reason, "MFA code rejected again");
                Err(AuthError::MfaRejected { attempts: 2 })
            }
        }
    }
}

#[async_trait]
impl Authenticator for InteractiveSessionAuth {
    fn provider(&self) -> Provider {
        Provider::Ecobee
    }

    async fn authenticate(&self) -> Result<AccessToken, AuthError> {
        if let Some(cached) = self.cache.load(ECOBEE_TOKEN_KEY) {
            if self.cache.is_valid(&cached, self.clock.now()) {
                debug!(expires_at = ?cached.expires_at, "Reusing cached access token");
                return Ok(AccessToken::from(&cached));
            }
            info!("Cached access token expired");
        }

        if let Some(session) = self.cache.load(ECOBEE_SESSION_KEY) {
            match self.surface.derive_token(&session.token).await? {
                DeriveOutcome::Token(grant) => {
                    info!("Reissued access token from stored session");
                    return self.store_token(grant);
                }
                DeriveOutcome::SessionExpired => {
                    warn!("Stored session expired, falling back to interactive login");
                    self.cache.clear(ECOBEE_SESSION_KEY)?;
                }
            }
        }

        let grant = self.login_with_retries().await?;
        self.store_token(grant)
    }

    async fn invalidate(&self) -> Result<(), AuthError> {
        self.cache.clear(ECOBEE_TOKEN_KEY)?;
        Ok(())
    }
}
