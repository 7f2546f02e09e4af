//! CLI error types and conversions

use crate::auth::AuthError;
use crate::dataset::DatasetError;
use crate::fetcher::FetcherError;
use crate::sync::ErrorKind;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Authentication or token cache error
    #[error("auth error: {0}")]
    AuthError(#[from] AuthError),

    /// Dataset error
    #[error("dataset error: {0}")]
    DatasetError(#[from] DatasetError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Report could not be rendered
    #[error("output error: {0}")]
    OutputError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::DatasetError(DatasetError::Corrupt { .. }) => {
                ErrorKind::DataCorruption.exit_code()
            }
            CliError::DatasetError(_) => ErrorKind::PartialWrite.exit_code(),
            CliError::AuthError(AuthError::Cache(_)) => ErrorKind::PartialWrite.exit_code(),
            CliError::AuthError(_) => ErrorKind::Auth.exit_code(),
            _ => 1,
        }
    }
}
