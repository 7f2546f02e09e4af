//! Main entry point for the utility-sync CLI

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use utility_sync::cli::{Cli, CliError, Commands};
use utility_sync::shutdown::ShutdownCoordinator;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("utility_sync=info"));

    // Logs go to stderr so reports on stdout stay machine-readable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // A missing .env file is fine; the process environment still applies
    dotenv::dotenv().ok();

    init_tracing();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Ctrl+C stops new work; merged data is still persisted
    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing current step and saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    // Execute command
    let result: Result<i32, CliError> = match &cli.command {
        Commands::Sync(args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map(|report| report.exit_code()),
        Commands::Token(token_cmd) => token_cmd.execute(&cli).await.map(|()| 0),
        Commands::Validate(validate_cmd) => validate_cmd.execute(&cli).await.map(|()| 0),
    };

    // Handle result
    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let code = e.exit_code();
            let e = anyhow::Error::new(e).context("utility-sync command failed");
            error!("{:#}", e);
            std::process::exit(code);
        }
    }
}
