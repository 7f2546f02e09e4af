//! Thermostat runtime report fetcher (equipment and climate)
//!
//! The vendor serves 5-minute runtime rows as CSV strings in the thermostat's
//! local time zone, at most 31 days per request. Rows are converted to UTC
//! readings and thinned to the configured storage interval.

use super::http::ProviderHttpClient;
use super::{ChannelFetcher, FetcherError, FetcherResult, SourceBatch};
use crate::auth::AccessToken;
use crate::planner::FetchWindow;
use crate::{Channel, Provider, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// User endpoint (default thermostat lookup)
pub const USER_ENDPOINT: &str = "/1/user";

/// Runtime report endpoint
pub const RUNTIME_REPORT_ENDPOINT: &str = "/1/runtimeReport";

/// Longest span, in days, accepted by one runtime report request
pub const MAX_CHUNK_DAYS: u64 = 31;

/// Pause between consecutive chunk requests
pub const CHUNK_PACING: Duration = Duration::from_millis(500);

/// Native row spacing of runtime reports, in minutes
pub const ROW_MINUTES: u32 = 5;

/// Runtime columns stored in the equipment channel
pub const EQUIPMENT_COLUMNS: &[&str] = &[
    "compCool1",
    "compCool2",
    "compHeat1",
    "compHeat2",
    "auxHeat1",
    "auxHeat2",
    "auxHeat3",
    "fan",
    "humidifier",
    "dehumidifier",
    "economizer",
    "ventilator",
    "hvacMode",
    "zoneHvacMode",
    "zoneCalendarEvent",
    "zoneClimate",
];

/// Runtime columns stored in the climate channel
pub const CLIMATE_COLUMNS: &[&str] = &[
    "zoneAveTemp",
    "zoneHumidity",
    "zoneCoolTemp",
    "zoneHeatTemp",
    "outdoorTemp",
    "outdoorHumidity",
];

/// Columns requested for a thermostat channel
pub fn columns_for(channel: Channel) -> Option<&'static [&'static str]> {
    match channel {
        Channel::ThermostatEquipment => Some(EQUIPMENT_COLUMNS),
        Channel::Climate => Some(CLIMATE_COLUMNS),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    default_thermostat_identifier: String,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeReport {
    #[serde(default)]
    status: Option<ApiStatus>,
    #[serde(default)]
    columns: String,
    #[serde(default)]
    report_list: Vec<ThermostatReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThermostatReport {
    thermostat_identifier: String,
    #[serde(default)]
    row_list: Vec<String>,
}

/// Fetcher for the thermostat vendor API
pub struct EcobeeFetcher {
    http: ProviderHttpClient,
    store_interval_minutes: u32,
    timezone: Tz,
    chunk_pacing: Duration,
    thermostat_id: OnceCell<String>,
}

impl EcobeeFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `http` - Client for the vendor API base URL
    /// * `store_interval_minutes` - Spacing of stored readings (multiple of 5)
    /// * `timezone` - Thermostat's local time zone, used to read report rows
    pub fn new(http: ProviderHttpClient, store_interval_minutes: u32, timezone: Tz) -> Self {
        Self {
            http,
            store_interval_minutes,
            timezone,
            chunk_pacing: CHUNK_PACING,
            thermostat_id: OnceCell::new(),
        }
    }

    /// Override the pause between chunk requests
    pub fn with_chunk_pacing(mut self, pacing: Duration) -> Self {
        self.chunk_pacing = pacing;
        self
    }

    async fn thermostat_id(&self, token: &AccessToken) -> FetcherResult<&str> {
        let id = self
            .thermostat_id
            .get_or_try_init(|| async {
                let response: UserResponse = self
                    .http
                    .get_json(
                        USER_ENDPOINT,
                        &[("format", "json".to_string()), ("json", "{}".to_string())],
                        Some(&token.value),
                        None,
                    )
                    .await?;
                info!(thermostat = %response.user.default_thermostat_identifier, "Resolved thermostat");
                Ok::<_, FetcherError>(response.user.default_thermostat_identifier)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn fetch_chunk(
        &self,
        token: &AccessToken,
        thermostat_id: &str,
        columns: &[&str],
        chunk: (NaiveDate, NaiveDate),
        window: &FetchWindow,
    ) -> FetcherResult<RuntimeReport> {
        let body = json!({
            "selection": {
                "selectionType": "thermostats",
                "selectionMatch": thermostat_id,
            },
            "startDate": chunk.0.format("%Y-%m-%d").to_string(),
            "endDate": chunk.1.format("%Y-%m-%d").to_string(),
            "startInterval": 0,
            "endInterval": 287,
            "columns": columns.join(","),
            "includeSensors": false,
        });

        let report: RuntimeReport = self
            .http
            .get_json(
                RUNTIME_REPORT_ENDPOINT,
                &[("format", "json".to_string()), ("body", body.to_string())],
                Some(&token.value),
                Some(window),
            )
            .await?;

        if let Some(status) = &report.status {
            if status.code != 0 {
                return Err(FetcherError::ApiError(format!(
                    "runtime report status {}: {}",
                    status.code, status.message
                )));
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl ChannelFetcher for EcobeeFetcher {
    fn provider(&self) -> Provider {
        Provider::Ecobee
    }

    async fn fetch(
        &self,
        token: &AccessToken,
        window: &FetchWindow,
    ) -> FetcherResult<Vec<SourceBatch>> {
        let columns = columns_for(window.channel).ok_or_else(|| {
            FetcherError::ApiError(format!("{} is not a thermostat channel", window.channel))
        })?;
        let thermostat_id = self.thermostat_id(token).await?;

        let chunks = date_chunks(
            local_date(window.start_time, self.timezone)?,
            local_date(window.end_time, self.timezone)?,
            MAX_CHUNK_DAYS,
        );
        let skip = (self.store_interval_minutes / ROW_MINUTES).max(1) as usize;

        let mut batches: BTreeMap<String, SourceBatch> = BTreeMap::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.chunk_pacing).await;
            }

            let report = self
                .fetch_chunk(
                    token,
                    thermostat_id,
                    columns,
                    *chunk,
                    window,
                )
                .await?;
            let returned: Vec<&str> = report.columns.split(',').collect();

            for thermostat in &report.report_list {
                let batch = batches
                    .entry(thermostat.thermostat_identifier.clone())
                    .or_insert_with(|| {
                        let mut batch = SourceBatch::new(thermostat.thermostat_identifier.clone());
                        batch
                            .metadata
                            .insert("timezone".into(), json!(self.timezone.name()));
                        batch
                    });

                let readings = parse_rows(&thermostat.row_list, &returned, self.timezone, skip)
                    .into_iter()
                    .filter(|r| r.timestamp >= window.start_time && r.timestamp <= window.end_time);
                batch.readings.extend(readings);
            }

            debug!(
                chunk = index + 1,
                chunks = chunks.len(),
                start = %chunk.0,
                end = %chunk.1,
                "Fetched runtime report chunk"
            );
        }

        let batches: Vec<SourceBatch> = batches
            .into_values()
            .filter(|b| !b.readings.is_empty())
            .collect();
        info!(
            channel = %window.channel,
            sources = batches.len(),
            readings = batches.iter().map(|b| b.readings.len()).sum::<usize>(),
            "Fetched thermostat runtime"
        );
        Ok(batches)
    }
}

fn local_date(timestamp_ms: i64, tz: Tz) -> FetcherResult<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.with_timezone(&tz).date_naive())
        .ok_or_else(|| FetcherError::InvalidResponse(format!("timestamp out of range: {timestamp_ms}")))
}

/// Split an inclusive date range into spans of at most `max_days` days
pub fn date_chunks(start: NaiveDate, end: NaiveDate, max_days: u64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut chunks = Vec::new();
    let span = max_days.saturating_sub(1);
    let mut chunk_start = start;

    while chunk_start <= end {
        let chunk_end = chunk_start
            .checked_add_days(Days::new(span))
            .map_or(end, |d| d.min(end));
        chunks.push((chunk_start, chunk_end));
        match chunk_end.checked_add_days(Days::new(1)) {
            Some(next) => chunk_start = next,
            None => break,
        }
    }
    chunks
}

/// Convert report rows to readings, keeping every `skip`th row
fn parse_rows(rows: &[String], columns: &[&str], tz: Tz, skip: usize) -> Vec<Reading> {
    let mut readings = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        if index % skip != 0 {
            continue;
        }

        let parts: Vec<&str> = row.split(',').collect();
        if parts.len() < 2 {
            continue;
        }

        let Ok(local) =
            NaiveDateTime::parse_from_str(&format!("{} {}", parts[0], parts[1]), "%Y-%m-%d %H:%M:%S")
        else {
            warn!(row = %row, "Skipping runtime row with unparseable time");
            continue;
        };
        // DST fall-back repeats an hour; the earlier instant wins
        let Some(instant) = tz.from_local_datetime(&local).earliest() else {
            debug!(row = %row, "Skipping runtime row in DST gap");
            continue;
        };

        let mut values = BTreeMap::new();
        let mut has_data = false;
        for (i, column) in columns.iter().enumerate() {
            let raw = parts.get(i + 2).map(|s| s.trim()).unwrap_or("");
            has_data |= !raw.is_empty();
            values.insert(column.to_string(), parse_value(raw));
        }
        // Future intervals of the current day come back empty
        if !has_data {
            continue;
        }

        if let Ok(reading) = Reading::new(instant.with_timezone(&Utc).timestamp_millis(), values) {
            readings.push(reading);
        }
    }

    readings
}

fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return json!(int);
    }
    match raw.parse::<f64>() {
        Ok(float) if float.is_finite() => json!(float),
        _ => json!(raw),
    }
}
