//! Failure classification and retry log lines for provider requests
//!
//! Every failed attempt is reduced to a [`FailureCause`]. The cause decides
//! whether the request is attempted again and which [`FetcherError`] the
//! caller finally sees. [`RequestScope`] renders the log lines with the
//! provider, channel and window the request belongs to.

use super::FetcherError;
use crate::planner::FetchWindow;
use crate::Provider;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Why one request attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Connect or request timeout
    Timeout,
    /// Connection refused or name resolution failed
    Unreachable,
    /// Connection dropped before the response was complete
    ConnectionLost,
    /// HTTP 429
    Throttled,
    /// HTTP 5xx
    ProviderDown(u16),
    /// HTTP 401/403, the bearer token was refused
    Refused(u16),
    /// Any other non-success status
    BadRequest(u16),
}

impl FailureCause {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode) -> Self {
        let code = status.as_u16();
        match code {
            401 | 403 => Self::Refused(code),
            429 => Self::Throttled,
            500..=599 => Self::ProviderDown(code),
            _ => Self::BadRequest(code),
        }
    }

    /// Classify a transport failure, while sending or while reading the body
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Unreachable
        } else {
            Self::ConnectionLost
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Refused(_) | Self::BadRequest(_))
    }

    /// Error handed to the caller once no further attempt is made
    pub fn into_error(self, endpoint: &str, detail: &str) -> FetcherError {
        match self {
            Self::Timeout => FetcherError::Timeout(format!("{endpoint}: {detail}")),
            Self::Unreachable | Self::ConnectionLost => {
                FetcherError::NetworkError(format!("{endpoint}: {detail}"))
            }
            Self::Throttled => FetcherError::RateLimitExceeded,
            Self::ProviderDown(code) => FetcherError::ServerError(code),
            Self::Refused(code) => FetcherError::Unauthorized(code),
            Self::BadRequest(code) => {
                FetcherError::HttpError(format!("Client error {code} from {endpoint}: {detail}"))
            }
        }
    }

    /// Operator hint for the final failure line
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Timeout | Self::Unreachable | Self::ConnectionLost => {
                "check connectivity to the provider"
            }
            Self::Throttled => "schedule runs further apart",
            Self::ProviderDown(_) => "the portal is likely down, the next scheduled run picks up the gap",
            Self::Refused(_) => "run `utility-sync token clear` and check the account credentials",
            Self::BadRequest(_) => "check the base URL, intervals and account details",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Unreachable => write!(f, "provider unreachable"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Throttled => write!(f, "throttled (HTTP 429)"),
            Self::ProviderDown(code) => write!(f, "provider error (HTTP {code})"),
            Self::Refused(code) => write!(f, "token refused (HTTP {code})"),
            Self::BadRequest(code) => write!(f, "request rejected (HTTP {code})"),
        }
    }
}

/// What a request was for: provider, endpoint and, for data requests, the window
#[derive(Debug, Clone, Copy)]
pub struct RequestScope<'a> {
    /// Provider answering the request
    pub provider: Provider,
    /// Endpoint path
    pub endpoint: &'a str,
    /// Channel window being fetched; `None` for account and login calls
    pub window: Option<&'a FetchWindow>,
}

impl RequestScope<'_> {
    /// Line logged before waiting for the next attempt
    pub fn retry_line(
        &self,
        cause: FailureCause,
        attempt: u32,
        max_attempts: u32,
        backoff: Duration,
    ) -> String {
        format!(
            "{self}: {cause} on attempt {attempt}/{max_attempts}, retrying in {:.1}s",
            backoff.as_secs_f64()
        )
    }

    /// Line logged when a request succeeds after earlier failures
    pub fn recovered_line(&self, attempt: u32, after: FailureCause) -> String {
        format!("{self}: succeeded on attempt {attempt} after {after}")
    }

    /// Line logged when the request is given up
    pub fn failure_line(&self, cause: FailureCause, attempts: u32, detail: &str) -> String {
        let mut line = format!(
            "{self}: {cause} after {attempts} attempt(s): {detail}; {}",
            cause.hint()
        );
        if cause.is_retryable() {
            line.push_str(" (or raise --max-retries)");
        }
        line
    }
}

impl fmt::Display for RequestScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider, self.endpoint)?;
        if let Some(window) = self.window {
            write!(
                f,
                " [{} {} .. {}]",
                window.channel,
                minute(window.start_time),
                minute(window.end_time)
            )?;
        }
        Ok(())
    }
}

fn minute(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
