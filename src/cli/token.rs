//! Token cache subcommand

use super::{Cli, CliError, OutputFormat, ProviderSelection};
use crate::auth::cache::keys_for;
use crate::auth::TokenCache;
use crate::Provider;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Token command for inspecting and deleting cached tokens
#[derive(Parser, Debug)]
pub struct TokenCommand {
    /// Action to perform
    #[command(subcommand)]
    pub action: TokenAction,
}

/// Token cache actions
#[derive(clap::Subcommand, Debug)]
pub enum TokenAction {
    /// Show cached tokens without printing their values
    Show {
        /// Provider (hsv, ecobee or all)
        #[arg(long, default_value = "all")]
        provider: ProviderSelection,
    },
    /// Delete cached tokens and sessions, forcing a fresh login
    Clear {
        /// Provider (hsv, ecobee or all)
        #[arg(long, default_value = "all")]
        provider: ProviderSelection,
    },
}

/// What the cache holds for one key
#[derive(Debug, Serialize)]
pub struct TokenStatus {
    /// Cache key
    pub key: &'static str,
    /// Provider
    pub provider: Provider,
    /// Cache file
    pub path: PathBuf,
    /// Whether a readable entry exists
    pub present: bool,
    /// Issue time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    /// Expiry, when the provider reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the entry would be reused now
    pub valid: bool,
}

impl TokenCommand {
    /// Execute the token command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let cache = TokenCache::new(&cli.token_dir);
        match &self.action {
            TokenAction::Show { provider } => {
                let statuses = token_statuses(&cache, *provider, Utc::now());
                match cli.output_format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
                    OutputFormat::Human => {
                        for status in &statuses {
                            println!("{}", render_status(status));
                        }
                    }
                }
                Ok(())
            }
            TokenAction::Clear { provider } => {
                for provider in provider.providers() {
                    for key in keys_for(provider) {
                        if cache.clear(key)? {
                            println!("Removed {}", cache.path_for(key).display());
                        } else {
                            println!("{key}: nothing cached");
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Describe every cache entry of the selected providers
pub fn token_statuses(
    cache: &TokenCache,
    selection: ProviderSelection,
    now: DateTime<Utc>,
) -> Vec<TokenStatus> {
    selection
        .providers()
        .into_iter()
        .flat_map(|provider| keys_for(provider).iter().map(move |key| (provider, *key)))
        .map(|(provider, key)| {
            let cached = cache.load(key);
            TokenStatus {
                key,
                provider,
                path: cache.path_for(key),
                present: cached.is_some(),
                issued_at: cached.as_ref().map(|c| c.issued_at),
                expires_at: cached.as_ref().and_then(|c| c.expires_at),
                valid: cached.as_ref().is_some_and(|c| cache.is_valid(c, now)),
            }
        })
        .collect()
}

fn render_status(status: &TokenStatus) -> String {
    if !status.present {
        return format!("{}: not cached", status.key);
    }
    let expiry = status
        .expires_at
        .map(|at| format!("expires {}", at.to_rfc3339()))
        .unwrap_or_else(|| "no expiry".to_string());
    let validity = if status.valid { "valid" } else { "expired" };
    format!("{}: {validity}, {expiry}", status.key)
}
