//! Provider HTTP client
//!
//! One client per provider with:
//! - explicit connect and request timeouts
//! - bearer-token, JSON and form requests with generic deserialization
//! - retry with exponential backoff on timeouts, dropped connections (including
//!   mid-body), 429 and 5xx
//! - immediate [`FetcherError::Unauthorized`] on 401/403 so the caller can
//!   re-authenticate instead of burning retries

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fetcher::retry::{FailureCause, RequestScope};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::planner::FetchWindow;
use crate::shutdown::SharedShutdown;
use crate::sync::config::{calculate_backoff, CONNECT_TIMEOUT, MAX_RETRIES, REQUEST_TIMEOUT};
use crate::Provider;

const USER_AGENT: &str = concat!("utility-sync/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for one provider's API
pub struct ProviderHttpClient {
    client: Client,
    base_url: String,
    provider: Provider,
    max_retries: u32,
    shutdown: Option<SharedShutdown>,
}

impl ProviderHttpClient {
    /// Create a client with the default timeouts
    ///
    /// # Arguments
    /// * `provider` - Provider the client talks to (for logs and errors)
    /// * `base_url` - Base URL for API endpoints (e.g., "https://api.ecobee.com")
    pub fn new(provider: Provider, base_url: impl Into<String>) -> FetcherResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetcherError::HttpError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider,
            max_retries: MAX_RETRIES,
            shutdown: None,
        })
    }

    /// Set maximum number of retries after the first attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach a shutdown handle so backoff waits can be interrupted
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Provider served by this client
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Execute a GET request and deserialize the JSON response
    ///
    /// # Arguments
    /// * `endpoint` - API endpoint path (e.g., "/1/user")
    /// * `query` - Query parameters as key-value pairs
    /// * `bearer` - Access token, if the endpoint is secured
    /// * `window` - Channel window being fetched, for log context
    pub async fn get_json<T>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
        window: Option<&FetchWindow>,
    ) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.url(endpoint);
        self.send_with_retry(endpoint, window, || {
            with_bearer(self.client.get(&url).query(query), bearer)
        })
        .await
    }

    /// Execute a POST request with a JSON body
    pub async fn post_json<T, B>(
        &self,
        endpoint: &str,
        body: &B,
        bearer: Option<&str>,
        window: Option<&FetchWindow>,
    ) -> FetcherResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let url = self.url(endpoint);
        self.send_with_retry(endpoint, window, || {
            with_bearer(self.client.post(&url).json(body), bearer)
        })
        .await
    }

    /// Execute a POST request with a URL-encoded form body
    pub async fn post_form<T>(&self, endpoint: &str, form: &[(&str, &str)]) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.url(endpoint);
        self.send_with_retry(endpoint, None, || self.client.post(&url).form(form))
            .await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Retry loop with exponential backoff
    ///
    /// Each attempt sends the request and reads the whole body; a failure in
    /// either step is classified by [`FailureCause`]. Timeouts, dropped
    /// connections, 429 and 5xx are attempted again. 401/403 and other 4xx
    /// end the loop at once. An undecodable successful body is not retried.
    async fn send_with_retry<T, F>(
        &self,
        endpoint: &str,
        window: Option<&FetchWindow>,
        build: F,
    ) -> FetcherResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let scope = RequestScope {
            provider: self.provider,
            endpoint,
            window,
        };
        let max_attempts = self.max_retries + 1;
        let mut previous: Option<FailureCause> = None;

        for attempt in 1..=max_attempts {
            let (cause, detail) = match self.attempt(&build).await {
                Ok(body) => {
                    let data = serde_json::from_slice::<T>(&body).map_err(|e| {
                        FetcherError::ParseError(format!(
                            "Failed to deserialize {endpoint} response: {e}"
                        ))
                    })?;
                    if let Some(cause) = previous {
                        info!("{}", scope.recovered_line(attempt, cause));
                    }
                    debug!(endpoint, attempt, "Request succeeded");
                    return Ok(data);
                }
                Err(failure) => failure,
            };

            if !cause.is_retryable() || attempt == max_attempts {
                warn!("{}", scope.failure_line(cause, attempt, &detail));
                return Err(cause.into_error(endpoint, &detail));
            }

            let backoff = calculate_backoff(attempt - 1);
            warn!("{}", scope.retry_line(cause, attempt, max_attempts, backoff));
            previous = Some(cause);
            self.wait(backoff).await?;
        }

        Err(FetcherError::NetworkError(format!(
            "All retries exhausted for {endpoint}"
        )))
    }

    /// Send once and read the full body
    async fn attempt<F>(&self, build: &F) -> Result<Vec<u8>, (FailureCause, String)>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = build()
            .send()
            .await
            .map_err(|e| (FailureCause::from_transport(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let cause = FailureCause::from_status(status);
            let detail = match cause {
                FailureCause::BadRequest(_) => response
                    .text()
                    .await
                    .map(|body| truncate(&body).to_string())
                    .unwrap_or_else(|_| "Unknown error".to_string()),
                _ => status.to_string(),
            };
            return Err((cause, detail));
        }

        response.bytes().await.map(|body| body.to_vec()).map_err(|e| {
            (
                FailureCause::from_transport(&e),
                format!("failed to read response body: {e}"),
            )
        })
    }

    async fn wait(&self, backoff: std::time::Duration) -> FetcherResult<()> {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_shutdown_requested() {
                    return Err(FetcherError::Cancelled);
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => Ok(()),
                    _ = shutdown.wait_for_shutdown() => Err(FetcherError::Cancelled),
                }
            }
            None => {
                tokio::time::sleep(backoff).await;
                Ok(())
            }
        }
    }
}

fn with_bearer(builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
