//! Session-token authentication (utility provider)
//!
//! `NoToken -> LoggingIn -> HasToken -> (Expired -> LoggingIn)`. The cached
//! token is returned while it is valid; otherwise the credential exchange runs
//! and its result replaces the cache entry.

use super::cache::{CachedToken, TokenCache, HSV_TOKEN_KEY};
use super::{AccessToken, AuthError, Authenticator};
use crate::clock::SharedClock;
use crate::credentials::Credential;
use crate::fetcher::http::ProviderHttpClient;
use crate::fetcher::FetcherError;
use crate::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Login endpoint of the SmartHub portal
pub const LOGIN_ENDPOINT: &str = "/services/oauth/auth/v2";

/// Token returned by a credential exchange
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Bearer token
    pub token: String,
    /// Expiry reported by the provider
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential-for-token exchange
#[async_trait]
pub trait LoginExchange: Send + Sync {
    /// Trade credentials for a bearer token
    async fn login(&self, credential: &Credential) -> Result<IssuedToken, AuthError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    authorization_token: Option<String>,
    /// Epoch milliseconds
    #[serde(default)]
    expiration: Option<i64>,
}

/// SmartHub OAuth login
pub struct SmartHubLogin {
    http: ProviderHttpClient,
}

impl SmartHubLogin {
    /// Create a login exchange over the given portal client
    pub fn new(http: ProviderHttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl LoginExchange for SmartHubLogin {
    async fn login(&self, credential: &Credential) -> Result<IssuedToken, AuthError> {
        let form = [
            ("userId", credential.username()),
            ("password", credential.password()),
        ];

        let response: LoginResponse = match self.http.post_form(LOGIN_ENDPOINT, &form).await {
            Ok(response) => response,
            Err(FetcherError::Unauthorized(status)) => {
                return Err(AuthError::InvalidCredentials {
                    provider: Provider::Hsv,
                    reason: format!("login refused with HTTP {status}"),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let token = response
            .authorization_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::InvalidCredentials {
                provider: Provider::Hsv,
                reason: "login response carried no authorization token".to_string(),
            })?;

        Ok(IssuedToken {
            token,
            expires_at: response
                .expiration
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

/// Authenticator for providers that hand out expiring bearer tokens
pub struct TokenAuth {
    credential: Credential,
    exchange: Arc<dyn LoginExchange>,
    cache: TokenCache,
    clock: SharedClock,
}

impl TokenAuth {
    /// Create a token authenticator
    pub fn new(
        credential: Credential,
        exchange: Arc<dyn LoginExchange>,
        cache: TokenCache,
        clock: SharedClock,
    ) -> Self {
        Self {
            credential,
            exchange,
            cache,
            clock,
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuth {
    fn provider(&self) -> Provider {
        self.credential.provider()
    }

    async fn authenticate(&self) -> Result<AccessToken, AuthError> {
        let now = self.clock.now();

        if let Some(cached) = self.cache.load(HSV_TOKEN_KEY) {
            if self.cache.is_valid(&cached, now) {
                debug!(expires_at = ?cached.expires_at, "Reusing cached token");
                return Ok(AccessToken::from(&cached));
            }
            info!(expires_at = ?cached.expires_at, "Cached token expired");
        }

        info!(provider = %self.provider(), "Logging in");
        let issued = self.exchange.login(&self.credential).await?;

        let cached = CachedToken {
            provider: self.provider(),
            token: issued.token,
            issued_at: now,
            expires_at: issued.expires_at,
        };
        if !self.cache.is_valid(&cached, now) {
            warn!(expires_at = ?cached.expires_at, "Provider issued a token that is already near expiry");
        }
        self.cache.save(HSV_TOKEN_KEY, &cached)?;

        Ok(AccessToken::from(&cached))
    }

    async fn invalidate(&self) -> Result<(), AuthError> {
        self.cache.clear(HSV_TOKEN_KEY)?;
        Ok(())
    }
}
