//! Sync subcommand

use super::{Cli, CliError, OutputFormat, ProviderSelection};
use crate::auth::{create_authenticator, AuthConfig};
use crate::clock::{SharedClock, SystemClock};
use crate::credentials::CredentialStore;
use crate::dataset::DatasetStore;
use crate::fetcher::probe::Prober;
use crate::fetcher::{
    create_fetcher, ChannelIntervals, FetcherConfig, DEFAULT_ECOBEE_BASE_URL, DEFAULT_HSV_BASE_URL,
};
use crate::merge::CollisionPolicy;
use crate::planner::{AnalysisPeriod, WindowPlanner};
use crate::shutdown::SharedShutdown;
use crate::sync::config::{DEFAULT_OVERLAP_HOURS, DEFAULT_PERIOD_DAYS};
use crate::sync::{ProviderJob, ProviderReport, SyncError, SyncExecutor, SyncOptions, SyncReport};
use crate::{Interval, Provider};
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

/// Arguments of the sync command
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Provider to sync (hsv, ecobee or all)
    #[arg(long, default_value = "all")]
    pub provider: ProviderSelection,

    /// Analysis period in days for full collections (-1 for all history)
    #[arg(
        long,
        env = "DATA_PERIOD_DAYS",
        default_value_t = AnalysisPeriod::Days(DEFAULT_PERIOD_DAYS),
        allow_hyphen_values = true
    )]
    pub period: AnalysisPeriod,

    /// Electric usage interval (15_MIN, HOURLY, DAILY, MONTHLY)
    #[arg(long, env = "ELECTRIC_INTERVAL", default_value = "HOURLY")]
    pub electric_interval: Interval,

    /// Gas usage interval (15_MIN, HOURLY, DAILY, MONTHLY)
    #[arg(long, env = "GAS_INTERVAL", default_value = "HOURLY")]
    pub gas_interval: Interval,

    /// Water usage interval (15_MIN, HOURLY, DAILY, MONTHLY)
    #[arg(long, env = "WATER_INTERVAL", default_value = "MONTHLY")]
    pub water_interval: Interval,

    /// Thermostat storage interval in minutes (multiple of 5)
    #[arg(long, env = "STORE_INTERVAL_MINUTES", default_value = "15", value_parser = parse_store_interval)]
    pub store_interval_minutes: u32,

    /// IANA time zone of the thermostat's report rows
    #[arg(long, env = "ECOBEE_TIMEZONE", default_value = "UTC", value_parser = parse_timezone)]
    pub timezone: Tz,

    /// External login driver for the thermostat vendor
    #[arg(long, env = "ECOBEE_LOGIN_DRIVER")]
    pub login_driver: Option<PathBuf>,

    /// Hours re-fetched before the newest stored reading
    #[arg(
        long,
        default_value_t = DEFAULT_OVERLAP_HOURS,
        value_parser = clap::value_parser!(i64).range(0..=720)
    )]
    pub overlap_hours: i64,

    /// Which value wins when a timestamp is already stored (incoming or existing)
    #[arg(long, default_value = "incoming")]
    pub on_collision: CollisionPolicy,

    /// Earliest date the providers serve (YYYY-MM-DD); probed when omitted
    #[arg(long, value_parser = parse_earliest)]
    pub earliest: Option<i64>,

    /// Ignore stored data and collect the whole analysis period
    #[arg(long)]
    pub full: bool,

    /// Utility portal base URL
    #[arg(long, env = "HSV_BASE_URL", default_value = DEFAULT_HSV_BASE_URL)]
    pub hsv_base_url: String,

    /// Thermostat API base URL
    #[arg(long, env = "ECOBEE_BASE_URL", default_value = DEFAULT_ECOBEE_BASE_URL)]
    pub ecobee_base_url: String,
}

fn parse_store_interval(s: &str) -> Result<u32, String> {
    let minutes: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid store interval: {s}"))?;
    if minutes == 0 || minutes % 5 != 0 {
        return Err(format!(
            "Invalid store interval: {minutes} (must be a positive multiple of 5)"
        ));
    }
    Ok(minutes)
}

fn parse_timezone(s: &str) -> Result<Tz, String> {
    s.trim()
        .parse::<Tz>()
        .map_err(|_| format!("Invalid time zone: {s} (expected an IANA name like America/Chicago)"))
}

fn parse_earliest(s: &str) -> Result<i64, String> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{s}': {e} (expected YYYY-MM-DD)"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| format!("Invalid date: {s}"))
}

impl SyncArgs {
    /// Run-wide options derived from the arguments
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            planner: WindowPlanner::new(self.period, Duration::hours(self.overlap_hours))
                .with_force_full(self.full),
            policy: self.on_collision,
            earliest: self.earliest,
            prober: Prober::default(),
        }
    }

    fn intervals(&self) -> ChannelIntervals {
        ChannelIntervals {
            electric: self.electric_interval,
            gas: self.gas_interval,
            water: self.water_interval,
        }
    }

    fn build_job(
        &self,
        cli: &Cli,
        provider: Provider,
        credentials: &CredentialStore,
        clock: &SharedClock,
        shutdown: &SharedShutdown,
    ) -> Result<ProviderJob, SyncError> {
        let credential = credentials.load(provider)?;

        let fetcher = create_fetcher(
            provider,
            &FetcherConfig {
                hsv_base_url: self.hsv_base_url.clone(),
                ecobee_base_url: self.ecobee_base_url.clone(),
                hsv_username: credential.username().to_string(),
                intervals: self.intervals(),
                store_interval_minutes: self.store_interval_minutes,
                timezone: self.timezone,
                max_retries: cli.max_retries,
                shutdown: Some(shutdown.clone()),
            },
        )?;

        let authenticator = create_authenticator(AuthConfig {
            token_dir: cli.token_dir.clone(),
            credential,
            clock: clock.clone(),
            hsv_base_url: self.hsv_base_url.clone(),
            login_driver: self.login_driver.clone(),
            max_retries: cli.max_retries,
        })?;

        Ok(ProviderJob {
            authenticator,
            fetcher,
            store: DatasetStore::new(&cli.data_dir, provider),
        })
    }

    /// Execute the sync command and print its report
    ///
    /// Providers whose setup fails (missing credentials, unusable base URL)
    /// are reported as failed; the remaining providers still run.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<SyncReport, CliError> {
        let clock = SystemClock::shared();
        let credentials = CredentialStore::from_env();

        info!(
            provider = ?self.provider,
            period = %self.period,
            overlap_hours = self.overlap_hours,
            on_collision = %self.on_collision,
            full = self.full,
            data_dir = %cli.data_dir.display(),
            "Starting sync"
        );

        let mut jobs = Vec::new();
        let mut setup_failures = Vec::new();
        for provider in self.provider.providers() {
            match self.build_job(cli, provider, &credentials, &clock, &shutdown) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Provider setup failed");
                    let mut report = ProviderReport::new(provider);
                    report.fail(&e);
                    setup_failures.push(report);
                }
            }
        }

        let executor = SyncExecutor::new(self.options(), clock).with_shutdown(shutdown);
        let mut report = executor.run(&jobs).await;
        report.providers.extend(setup_failures);
        report.providers.sort_by_key(|p| p.provider);

        match cli.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Human => println!("{}", report.render_human()),
        }

        Ok(report)
    }
}
