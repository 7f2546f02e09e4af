//! Authentication drivers and on-disk token cache
//!
//! Two very different login flows sit behind one [`Authenticator`] contract:
//!
//! - [`token::TokenAuth`] - credential exchange for a bearer token with a known
//!   expiry (utility provider)
//! - [`session::InteractiveSessionAuth`] - browser login with an MFA challenge,
//!   yielding a long-lived session from which short-lived API tokens are
//!   derived (thermostat vendor)
//!
//! Both consult [`cache::TokenCache`] on every call, so a second
//! `authenticate()` within the validity window never reaches the network.

pub mod cache;
pub mod driver;
pub mod session;
pub mod token;
pub mod totp;

use crate::clock::SharedClock;
use crate::credentials::Credential;
use crate::fetcher::http::ProviderHttpClient;
use crate::fetcher::FetcherError;
use crate::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CachedToken, TokenCache};

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Username or password rejected by the provider
    #[error("credentials rejected by {provider}: {reason}")]
    InvalidCredentials {
        /// Provider that refused the login
        provider: Provider,
        /// Provider-supplied or inferred reason
        reason: String,
    },

    /// MFA code rejected after the single permitted retry
    #[error("MFA code rejected after {attempts} attempts")]
    MfaRejected {
        /// Codes submitted before giving up
        attempts: u32,
    },

    /// Provider kept refusing requests after a fresh login
    #[error("{provider} refused a freshly issued token (HTTP {status})")]
    Refused {
        /// Provider that refused the token
        provider: Provider,
        /// HTTP status of the second refusal
        status: u16,
    },

    /// A required configuration value is absent
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    /// TOTP seed could not be decoded
    #[error("invalid TOTP secret: {0}")]
    InvalidTotpSecret(String),

    /// A fresh session produced no API token
    #[error("login session did not yield an access token")]
    SessionUnavailable,

    /// External login driver failed or spoke an unexpected protocol
    #[error("login driver error: {0}")]
    Driver(String),

    /// Interactive login exceeded its time budget
    #[error("interactive login timed out after {0:?}")]
    LoginTimeout(Duration),

    /// Network failure during a login exchange
    #[error("network error during login: {0}")]
    Network(#[from] FetcherError),

    /// Token cache could not be written or removed
    #[error("token cache error: {0}")]
    Cache(String),
}

impl AuthError {
    /// Whether the failure is transient (retrying later may succeed)
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::LoginTimeout(_) => true,
            AuthError::Network(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Bearer token handed to channel fetchers
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Token value sent as `Authorization: Bearer ...`
    pub value: String,
    /// Expiry, when the provider reports one
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Create a token
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<&CachedToken> for AccessToken {
    fn from(cached: &CachedToken) -> Self {
        Self::new(cached.token.clone(), cached.expires_at)
    }
}

/// Obtains a valid access token for one provider
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Provider this authenticator logs into
    fn provider(&self) -> Provider;

    /// Return a usable token, logging in only when the cache cannot serve one
    async fn authenticate(&self) -> Result<AccessToken, AuthError>;

    /// Drop the cached access token after the provider refused it
    async fn invalidate(&self) -> Result<(), AuthError>;
}

/// Inputs needed to build an authenticator
#[derive(Clone)]
pub struct AuthConfig {
    /// Directory holding token cache files
    pub token_dir: PathBuf,
    /// Account secrets for the provider
    pub credential: Credential,
    /// Time source
    pub clock: SharedClock,
    /// Base URL of the utility portal
    pub hsv_base_url: String,
    /// External browser login program for the thermostat vendor
    pub login_driver: Option<PathBuf>,
    /// Retry budget for login HTTP calls and interactive login attempts
    pub max_retries: u32,
}

/// Create the authenticator for `config.credential`'s provider
///
/// # Errors
/// Returns an error if the login HTTP client cannot be built
pub fn create_authenticator(config: AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    let cache = TokenCache::new(&config.token_dir);

    match config.credential.provider() {
        Provider::Hsv => {
            let http = ProviderHttpClient::new(Provider::Hsv, &config.hsv_base_url)?
                .with_max_retries(config.max_retries);
            let exchange = Arc::new(token::SmartHubLogin::new(http));
            Ok(Box::new(token::TokenAuth::new(
                config.credential,
                exchange,
                cache,
                config.clock,
            )))
        }
        Provider::Ecobee => {
            let surface = Arc::new(driver::ExternalLoginDriver::new(config.login_driver));
            Ok(Box::new(session::InteractiveSessionAuth::new(
                config.credential,
                surface,
                Arc::new(totp::Rfc6238Totp),
                cache,
                config.clock,
            )
            .with_max_retries(config.max_retries)))
        }
    }
}
