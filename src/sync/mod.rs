//! Sync orchestration
//!
//! One run walks every selected provider in turn:
//!
//! 1. **Load**: read the current dataset ([`crate::dataset::DatasetStore`])
//! 2. **Authenticate**: obtain a token through [`crate::auth::Authenticator`]
//! 3. **Plan**: compute one window per channel ([`crate::planner`])
//! 4. **Fetch**: request the window ([`crate::fetcher::ChannelFetcher`])
//! 5. **Merge**: fold the readings into the dataset ([`crate::merge`])
//! 6. **Persist**: commit the dataset atomically when it changed
//!
//! # Components
//!
//! - [`executor`] - Runs the steps above with re-authentication and shutdown handling
//! - [`job`] - Per-channel, per-provider and per-run reports
//! - [`config`] - Timeouts, retry budget and backoff calculation
//!
//! # Error Handling
//!
//! Every [`SyncError`] maps to an [`ErrorKind`]. Authentication and persistence
//! failures abort the provider; a failed channel is reported and the run moves
//! on to the next one.

pub mod config;
pub mod executor;
pub mod job;

pub use executor::{ProviderJob, SyncExecutor, SyncOptions};
pub use job::{ChannelReport, ChannelStatus, ProviderReport, SyncReport};

use crate::auth::AuthError;
use crate::dataset::DatasetError;
use crate::fetcher::FetcherError;
use serde::Serialize;

/// Failure taxonomy shared by reports and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials or MFA rejected, or a fresh token refused
    Auth,
    /// Timeout, connection failure, 429 or 5xx after retries
    TransientNetwork,
    /// A persisted dataset cannot be trusted
    DataCorruption,
    /// A write failed; the previous current file is intact
    PartialWrite,
    /// Provider answered with something unusable
    Upstream,
    /// Stopped by a shutdown request
    Interrupted,
}

impl ErrorKind {
    /// Process exit status for this kind
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::TransientNetwork | ErrorKind::Upstream => 1,
            ErrorKind::Auth => 2,
            ErrorKind::DataCorruption => 3,
            ErrorKind::PartialWrite => 4,
            ErrorKind::Interrupted => 130,
        }
    }

    /// Rank used to pick the exit status when several failures occurred
    pub(crate) fn severity(&self) -> u8 {
        match self {
            ErrorKind::Upstream => 1,
            ErrorKind::TransientNetwork => 2,
            ErrorKind::Interrupted => 3,
            ErrorKind::Auth => 4,
            ErrorKind::PartialWrite => 5,
            ErrorKind::DataCorruption => 6,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::DataCorruption => "data_corruption",
            ErrorKind::PartialWrite => "partial_write",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Dataset could not be read or written
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Channel fetch failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetcherError),

    /// Shutdown requested before the step started
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl SyncError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Auth(e) => match e {
                AuthError::LoginTimeout(_) => ErrorKind::TransientNetwork,
                AuthError::Network(FetcherError::Cancelled) => ErrorKind::Interrupted,
                AuthError::Network(e) if e.is_transient() => ErrorKind::TransientNetwork,
                AuthError::Network(_) | AuthError::Driver(_) => ErrorKind::Upstream,
                AuthError::Cache(_) => ErrorKind::PartialWrite,
                AuthError::InvalidCredentials { .. }
                | AuthError::MfaRejected { .. }
                | AuthError::Refused { .. }
                | AuthError::MissingCredential(_)
                | AuthError::InvalidTotpSecret(_)
                | AuthError::SessionUnavailable => ErrorKind::Auth,
            },
            SyncError::Dataset(e) => match e {
                DatasetError::Corrupt { .. } => ErrorKind::DataCorruption,
                DatasetError::Io(_) | DatasetError::PartialWrite { .. } | DatasetError::Backup { .. } => {
                    ErrorKind::PartialWrite
                }
            },
            SyncError::Fetch(e) => match e {
                FetcherError::Cancelled => ErrorKind::Interrupted,
                FetcherError::Unauthorized(_) => ErrorKind::Auth,
                e if e.is_transient() => ErrorKind::TransientNetwork,
                _ => ErrorKind::Upstream,
            },
            SyncError::Cancelled => ErrorKind::Interrupted,
        }
    }
}
