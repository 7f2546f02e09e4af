//! Channel fetchers
//!
//! A [`ChannelFetcher`] turns one [`FetchWindow`] into per-source batches of
//! readings. Fetchers never touch the dataset or the token cache; a refused
//! token surfaces as [`FetcherError::Unauthorized`] and the executor decides
//! whether to re-authenticate.

use crate::auth::AccessToken;
use crate::planner::FetchWindow;
use crate::shutdown::SharedShutdown;
use crate::{Channel, Interval, Provider, Reading};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::collections::BTreeMap;

pub mod ecobee;
pub mod http;
pub mod probe;
pub mod retry;
pub mod smarthub;

/// Default base URL of the utility portal
pub const DEFAULT_HSV_BASE_URL: &str = "https://hsvutil.smarthub.coop";

/// Default base URL of the thermostat vendor API
pub const DEFAULT_ECOBEE_BASE_URL: &str = "https://api.ecobee.com";

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Non-retryable HTTP error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server error that persisted through all retries
    #[error("server error: HTTP {0}")]
    ServerError(u16),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// API error response
    #[error("API error: {0}")]
    ApiError(String),

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Request or poll timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Token refused (401/403)
    #[error("unauthorized: HTTP {0}")]
    Unauthorized(u16),

    /// Interrupted by shutdown
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl FetcherError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetcherError::ServerError(_)
                | FetcherError::RateLimitExceeded
                | FetcherError::NetworkError(_)
                | FetcherError::Timeout(_)
        )
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Readings of one source (meter or thermostat) within a fetch window
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    /// Meter number or thermostat identifier
    pub source_id: String,
    /// Unit of measure, flow direction and similar descriptors
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Readings, in provider order
    pub readings: Vec<Reading>,
}

impl SourceBatch {
    /// Create an empty batch for `source_id`
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            metadata: BTreeMap::new(),
            readings: Vec::new(),
        }
    }
}

/// Fetches readings for the channels of one provider
#[async_trait]
pub trait ChannelFetcher: Send + Sync {
    /// Provider served by this fetcher
    fn provider(&self) -> Provider;

    /// Fetch readings for `window`
    ///
    /// # Arguments
    /// * `token` - Bearer token from the provider's authenticator
    /// * `window` - Channel and time range (Unix milliseconds) to fetch
    ///
    /// # Returns
    /// One batch per source that reported data in the window
    async fn fetch(&self, token: &AccessToken, window: &FetchWindow)
        -> FetcherResult<Vec<SourceBatch>>;
}

/// Usage interval requested per utility channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelIntervals {
    /// Electric interval
    pub electric: Interval,
    /// Gas interval
    pub gas: Interval,
    /// Water interval
    pub water: Interval,
}

impl Default for ChannelIntervals {
    fn default() -> Self {
        Self {
            electric: Interval::Hourly,
            gas: Interval::Hourly,
            water: Interval::Monthly,
        }
    }
}

impl ChannelIntervals {
    /// Interval for a utility channel
    pub fn for_channel(&self, channel: Channel) -> Option<Interval> {
        match channel {
            Channel::Electric => Some(self.electric),
            Channel::Gas => Some(self.gas),
            Channel::Water => Some(self.water),
            _ => None,
        }
    }
}

/// Inputs needed to build a fetcher
#[derive(Clone)]
pub struct FetcherConfig {
    /// Utility portal base URL
    pub hsv_base_url: String,
    /// Thermostat API base URL
    pub ecobee_base_url: String,
    /// Utility account username (the portal scopes queries by user)
    pub hsv_username: String,
    /// Per-channel utility intervals
    pub intervals: ChannelIntervals,
    /// Thermostat storage interval in minutes (multiple of 5)
    pub store_interval_minutes: u32,
    /// Time zone of thermostat report rows
    pub timezone: Tz,
    /// Retry budget for HTTP calls
    pub max_retries: u32,
    /// Shutdown handle for interruptible backoff
    pub shutdown: Option<SharedShutdown>,
}

/// Create the fetcher for `provider`
///
/// # Errors
/// Returns an error if the HTTP client cannot be built
pub fn create_fetcher(
    provider: Provider,
    config: &FetcherConfig,
) -> FetcherResult<Box<dyn ChannelFetcher>> {
    match provider {
        Provider::Hsv => {
            let mut http = http::ProviderHttpClient::new(Provider::Hsv, &config.hsv_base_url)?
                .with_max_retries(config.max_retries);
            if let Some(shutdown) = &config.shutdown {
                http = http.with_shutdown(shutdown.clone());
            }
            Ok(Box::new(smarthub::SmartHubFetcher::new(
                http,
                config.hsv_username.clone(),
                config.intervals,
            )))
        }
        Provider::Ecobee => {
            let mut http =
                http::ProviderHttpClient::new(Provider::Ecobee, &config.ecobee_base_url)?
                    .with_max_retries(config.max_retries);
            if let Some(shutdown) = &config.shutdown {
                http = http.with_shutdown(shutdown.clone());
            }
            Ok(Box::new(ecobee::EcobeeFetcher::new(
                http,
                config.store_interval_minutes,
                config.timezone,
            )))
        }
    }
}
