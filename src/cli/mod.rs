//! CLI command implementations

pub mod error;
pub mod sync;
pub mod token;
pub mod validate;

pub use error::CliError;
pub use sync::SyncArgs;
pub use token::TokenCommand;
pub use validate::ValidateCommand;

use crate::Provider;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// Utility Sync CLI
#[derive(Parser, Debug)]
#[command(name = "utility-sync")]
#[command(about = "Incrementally sync utility meter and thermostat telemetry into local datasets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Root directory for dataset files
    #[arg(long, global = true, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding cached tokens and sessions
    #[arg(long, global = true, env = "TOKEN_DIR", default_value = ".")]
    pub token_dir: PathBuf,

    /// Maximum number of retries for failed requests and logins (1-20)
    #[arg(
        long,
        global = true,
        default_value_t = crate::sync::config::MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(1..=20)
    )]
    pub max_retries: u32,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch new readings and merge them into the datasets
    Sync(SyncArgs),

    /// Inspect or delete cached tokens
    Token(TokenCommand),

    /// Check the stored datasets without writing
    Validate(ValidateCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Providers a command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    /// Every supported provider
    All,
    /// A single provider
    One(Provider),
}

impl ProviderSelection {
    /// Selected providers, in run order
    pub fn providers(&self) -> Vec<Provider> {
        match self {
            ProviderSelection::All => Provider::ALL.to_vec(),
            ProviderSelection::One(provider) => vec![*provider],
        }
    }
}

impl FromStr for ProviderSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(ProviderSelection::All);
        }
        Provider::from_str(s).map(ProviderSelection::One)
    }
}
