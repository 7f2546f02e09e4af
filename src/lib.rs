//! # Utility Sync Library
//!
//! Incremental synchronization of utility meter and smart-thermostat telemetry
//! into local JSON datasets, designed to run unattended every few minutes.
//!
//! ## Features
//!
//! - **Two auth flows, one contract**: session-token login for the utility
//!   provider and browser-driven MFA login for the thermostat vendor, both
//!   behind [`auth::Authenticator`] with on-disk token caching
//! - **Incremental windows**: fetch only what is new, with a deliberate overlap
//!   to catch late or revised readings
//! - **Idempotent merge**: dedup by timestamp with an explicit collision policy
//! - **Crash-safe persistence**: atomic current-file writes plus timestamped
//!   backups
//!
//! ## Architecture
//!
//! - [`credentials`] - Account secrets loaded from process configuration
//! - [`auth`] - Token cache and the two authentication drivers
//! - [`fetcher`] - Provider HTTP clients and channel fetchers
//! - [`planner`] - Fetch window computation (full vs incremental)
//! - [`merge`] - Dedup-merge of fetched readings into existing series
//! - [`dataset`] - Dataset model, validation and atomic storage
//! - [`sync`] - Orchestration of one run across providers and channels
//!
//! ## Data Types
//!
//! - [`Provider`] - Remote data provider (utility or thermostat vendor)
//! - [`Channel`] - Telemetry category
//! - [`Interval`] - Usage granularity requested from the utility provider
//! - [`Reading`] - One timestamped data point

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Authentication drivers and token cache
pub mod auth;

/// CLI command implementations
pub mod cli;

/// Substitutable time source
pub mod clock;

/// Account credentials
pub mod credentials;

/// Dataset model and persistence
pub mod dataset;

/// Channel fetchers
pub mod fetcher;

/// Dedup-merge engine
pub mod merge;

/// Fetch window planning
pub mod planner;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Sync orchestration
pub mod sync;

/// Remote data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Municipal utility provider (SmartHub portal)
    Hsv,
    /// Smart-thermostat vendor
    Ecobee,
}

impl Provider {
    /// All supported providers
    pub const ALL: [Provider; 2] = [Provider::Hsv, Provider::Ecobee];

    /// Channels collected from this provider
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            Provider::Hsv => &[Channel::Electric, Channel::Gas, Channel::Water],
            Provider::Ecobee => &[Channel::ThermostatEquipment, Channel::Climate],
        }
    }

    /// Short lowercase name used in file names and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Hsv => "hsv",
            Provider::Ecobee => "ecobee",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hsv" | "utility" => Ok(Provider::Hsv),
            "ecobee" | "thermostat" => Ok(Provider::Ecobee),
            _ => Err(format!("Invalid provider: {s}")),
        }
    }
}

/// Telemetry channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Electric meter usage
    #[serde(rename = "ELECTRIC")]
    Electric,
    /// Gas meter usage
    #[serde(rename = "GAS")]
    Gas,
    /// Water meter usage
    #[serde(rename = "WATER")]
    Water,
    /// Thermostat equipment runtime (compressor, heat, fan, modes)
    #[serde(rename = "THERMOSTAT_EQUIPMENT")]
    ThermostatEquipment,
    /// Indoor and outdoor temperature and humidity
    #[serde(rename = "CLIMATE")]
    Climate,
}

impl Channel {
    /// Provider that serves this channel
    pub fn provider(&self) -> Provider {
        match self {
            Channel::Electric | Channel::Gas | Channel::Water => Provider::Hsv,
            Channel::ThermostatEquipment | Channel::Climate => Provider::Ecobee,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Electric => "ELECTRIC",
            Channel::Gas => "GAS",
            Channel::Water => "WATER",
            Channel::ThermostatEquipment => "THERMOSTAT_EQUIPMENT",
            Channel::Climate => "CLIMATE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ELECTRIC" => Ok(Channel::Electric),
            "GAS" => Ok(Channel::Gas),
            "WATER" => Ok(Channel::Water),
            "THERMOSTAT_EQUIPMENT" => Ok(Channel::ThermostatEquipment),
            "CLIMATE" => Ok(Channel::Climate),
            _ => Err(format!("Invalid channel: {s}")),
        }
    }
}

/// Usage interval requested from the utility provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 15 minutes
    #[serde(rename = "FIFTEEN_MINUTE")]
    FifteenMinute,
    /// 1 hour
    #[serde(rename = "HOURLY")]
    Hourly,
    /// 1 day
    #[serde(rename = "DAILY")]
    Daily,
    /// 1 month
    #[serde(rename = "MONTHLY")]
    Monthly,
}

impl Interval {
    /// Convert interval to milliseconds
    pub fn to_milliseconds(&self) -> i64 {
        match self {
            Interval::FifteenMinute => 900_000,
            Interval::Hourly => 3_600_000,
            Interval::Daily => 86_400_000,
            Interval::Monthly => 2_592_000_000, // Approximate: 30 days
        }
    }

    /// Name used by the provider's `timeFrame` request field
    pub fn as_time_frame(&self) -> &'static str {
        match self {
            Interval::FifteenMinute => "FIFTEEN_MINUTE",
            Interval::Hourly => "HOURLY",
            Interval::Daily => "DAILY",
            Interval::Monthly => "MONTHLY",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_time_frame())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "15_MIN" | "FIFTEEN_MINUTE" => Ok(Interval::FifteenMinute),
            "HOURLY" => Ok(Interval::Hourly),
            "DAILY" => Ok(Interval::Daily),
            "MONTHLY" => Ok(Interval::Monthly),
            _ => Err(format!("Invalid interval: {s}")),
        }
    }
}

/// A single timestamped reading
///
/// `timestamp` is the dedup key; `datetime` is derived from it and kept only
/// for human inspection of the stored files. All other fields are the
/// provider-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// ISO-8601 UTC rendering of `timestamp`
    pub datetime: String,
    /// Payload fields
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Reading {
    /// Create a reading, deriving `datetime` from `timestamp`
    pub fn new(
        timestamp: i64,
        values: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let datetime = format_datetime(timestamp)
            .ok_or_else(|| format!("Timestamp out of range: {timestamp}"))?;
        Ok(Self {
            timestamp,
            datetime,
            values,
        })
    }

    /// Create a reading with a single payload field
    pub fn single(
        timestamp: i64,
        field: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<Self, String> {
        let mut values = BTreeMap::new();
        values.insert(field.to_string(), value.into());
        Self::new(timestamp, values)
    }

    /// Look up a payload field
    pub fn value(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }

    /// Validate that `datetime` still matches `timestamp`
    pub fn validate(&self) -> Result<(), String> {
        let parsed = DateTime::parse_from_rfc3339(&self.datetime).map_err(|e| {
            format!(
                "Unparseable datetime '{}' at timestamp {}: {e}",
                self.datetime, self.timestamp
            )
        })?;

        if parsed.timestamp_millis() != self.timestamp {
            return Err(format!(
                "Datetime '{}' does not match timestamp {}",
                self.datetime, self.timestamp
            ));
        }

        Ok(())
    }
}

/// Render epoch milliseconds as an ISO-8601 UTC string
pub fn format_datetime(timestamp_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
