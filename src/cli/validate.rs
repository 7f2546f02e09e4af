//! Validation subcommand

use super::{Cli, CliError, OutputFormat, ProviderSelection};
use crate::dataset::{DatasetError, DatasetStore};
use crate::{format_datetime, Channel, Provider};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Validate command for checking stored datasets without writing
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Provider (hsv, ecobee or all)
    #[arg(long, default_value = "all")]
    pub provider: ProviderSelection,
}

/// Summary of one channel in a valid dataset
#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    /// Channel
    pub channel: Channel,
    /// Number of series
    pub series: usize,
    /// Readings across series
    pub readings: usize,
    /// Newest timestamp, Unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<i64>,
}

/// Validation outcome for one provider
#[derive(Debug, Serialize)]
pub struct DatasetCheck {
    /// Provider
    pub provider: Provider,
    /// Current file checked
    pub path: PathBuf,
    /// Whether the file exists
    pub present: bool,
    /// Per-channel summary of a valid file
    pub channels: Vec<ChannelSummary>,
    /// Why the file cannot be trusted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read and validate the current dataset of `provider`
pub fn check_dataset(data_dir: &Path, provider: Provider) -> (DatasetCheck, Option<DatasetError>) {
    let store = DatasetStore::new(data_dir, provider);
    let mut check = DatasetCheck {
        provider,
        path: store.paths().current(),
        present: false,
        channels: Vec::new(),
        error: None,
    };

    match store.read() {
        Ok(None) => (check, None),
        Ok(Some(dataset)) => {
            check.present = true;
            check.channels = dataset
                .channels()
                .map(|channel| ChannelSummary {
                    channel,
                    series: dataset.series(channel).len(),
                    readings: dataset.series(channel).iter().map(|s| s.readings.len()).sum(),
                    last_timestamp: dataset.last_timestamp(channel),
                })
                .collect();
            (check, None)
        }
        Err(e) => {
            check.present = check.path.exists();
            check.error = Some(e.to_string());
            (check, Some(e))
        }
    }
}

impl ValidateCommand {
    /// Execute the validation command
    ///
    /// Every selected provider is checked; the first failure is returned
    /// after all reports are printed.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let mut checks = Vec::new();
        let mut first_error = None;

        for provider in self.provider.providers() {
            let (check, error) = check_dataset(&cli.data_dir, provider);
            checks.push(check);
            if first_error.is_none() {
                first_error = error;
            }
        }

        match cli.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&checks)?),
            OutputFormat::Human => {
                for check in &checks {
                    print_check(check);
                }
            }
        }

        match first_error {
            Some(e) => Err(CliError::DatasetError(e)),
            None => Ok(()),
        }
    }
}

fn print_check(check: &DatasetCheck) {
    if let Some(error) = &check.error {
        println!("{}: INVALID {}", check.provider, error);
        return;
    }
    if !check.present {
        println!("{}: no dataset at {}", check.provider, check.path.display());
        return;
    }

    println!("{}: OK {}", check.provider, check.path.display());
    for summary in &check.channels {
        let last = summary
            .last_timestamp
            .and_then(format_datetime)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<21} {} series, {} readings, last {last}",
            summary.channel.to_string(),
            summary.series,
            summary.readings
        );
    }
}
