//! SmartHub utility portal fetcher (electric, gas, water)
//!
//! Usage data is produced asynchronously by the portal: the same poll request
//! is re-posted until the response status is `COMPLETE`. Each industry's
//! payload lists meters and one `{x, y}` series per meter; water accounts
//! without meter data fall back to service-level points.

use super::http::ProviderHttpClient;
use super::{ChannelFetcher, ChannelIntervals, FetcherError, FetcherResult, SourceBatch};
use crate::auth::AccessToken;
use crate::planner::FetchWindow;
use crate::{Channel, Provider, Reading};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Account lookup endpoint
pub const ACCOUNTS_ENDPOINT: &str = "/services/secured/accounts";

/// Usage poll endpoint
pub const POLL_ENDPOINT: &str = "/services/secured/utility-usage/poll";

/// Delay between usage polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls before giving up on a usage request
pub const MAX_POLLS: u32 = 30;

const POLL_COMPLETE: &str = "COMPLETE";

/// Account and service location the usage queries are scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account number
    pub account_number: String,
    /// Service location number
    pub service_location: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountEntry {
    account: Value,
    #[serde(default)]
    service_locations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, Option<Vec<ServiceUsage>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceUsage {
    #[serde(default)]
    meters: Vec<MeterInfo>,
    #[serde(default)]
    series: Vec<UsageSeries>,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    unit_of_measure: Option<String>,
    #[serde(default)]
    service_location_number: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeterInfo {
    #[serde(default)]
    meter_number: Option<Value>,
    #[serde(default)]
    unit_of_measure: Option<String>,
    #[serde(default)]
    flow_direction: Option<String>,
    #[serde(default)]
    is_net_meter: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct UsageSeries {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    data: Vec<Value>,
}

/// Fetcher for the utility portal
pub struct SmartHubFetcher {
    http: ProviderHttpClient,
    username: String,
    intervals: ChannelIntervals,
    poll_interval: Duration,
    max_polls: u32,
    account: OnceCell<AccountInfo>,
}

impl SmartHubFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `http` - Client for the portal base URL
    /// * `username` - Portal user the queries are scoped to
    /// * `intervals` - Usage interval requested per channel
    pub fn new(http: ProviderHttpClient, username: String, intervals: ChannelIntervals) -> Self {
        Self {
            http,
            username,
            intervals,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            account: OnceCell::new(),
        }
    }

    /// Override poll pacing
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn account(&self, token: &AccessToken) -> FetcherResult<&AccountInfo> {
        self.account
            .get_or_try_init(|| async {
                let accounts: Vec<AccountEntry> = self
                    .http
                    .get_json(
                        ACCOUNTS_ENDPOINT,
                        &[("user", self.username.clone())],
                        Some(&token.value),
                        None,
                    )
                    .await?;

                let entry = accounts
                    .into_iter()
                    .next()
                    .ok_or_else(|| FetcherError::ApiError("No accounts for user".to_string()))?;
                let service_location = entry
                    .service_locations
                    .first()
                    .and_then(id_string)
                    .ok_or_else(|| {
                        FetcherError::InvalidResponse("Account has no service location".to_string())
                    })?;
                let account_number = id_string(&entry.account).ok_or_else(|| {
                    FetcherError::InvalidResponse("Account number missing".to_string())
                })?;

                info!(account = %account_number, service_location = %service_location, "Resolved utility account");
                Ok::<_, FetcherError>(AccountInfo {
                    account_number,
                    service_location,
                })
            })
            .await
    }

    async fn poll_usage(
        &self,
        token: &AccessToken,
        payload: &Value,
        window: &FetchWindow,
    ) -> FetcherResult<PollResponse> {
        for poll in 1..=self.max_polls {
            let response: PollResponse = self
                .http
                .post_json(POLL_ENDPOINT, payload, Some(&token.value), Some(window))
                .await?;

            if response.status.as_deref() == Some(POLL_COMPLETE) {
                debug!(polls = poll, "Usage poll complete");
                return Ok(response);
            }

            debug!(poll, status = ?response.status, "Usage not ready yet");
            if poll < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(FetcherError::Timeout(format!(
            "usage poll did not complete after {} polls",
            self.max_polls
        )))
    }
}

#[async_trait]
impl ChannelFetcher for SmartHubFetcher {
    fn provider(&self) -> Provider {
        Provider::Hsv
    }

    async fn fetch(
        &self,
        token: &AccessToken,
        window: &FetchWindow,
    ) -> FetcherResult<Vec<SourceBatch>> {
        let interval = self.intervals.for_channel(window.channel).ok_or_else(|| {
            FetcherError::ApiError(format!("{} is not a utility channel", window.channel))
        })?;
        let account = self.account(token).await?;

        let payload = json!({
            "timeFrame": interval.as_time_frame(),
            "userId": self.username,
            "screen": "USAGE_EXPLORER",
            "includeDemand": false,
            "serviceLocationNumber": account.service_location,
            "accountNumber": account.account_number,
            "industries": [window.channel.to_string()],
            "startDateTime": window.start_time,
            "endDateTime": window.end_time,
        });

        let response = self
            .poll_usage(token, &payload, window)
            .await?;
        let batches = parse_usage(&response, window.channel)?;

        info!(
            channel = %window.channel,
            interval = %interval,
            sources = batches.len(),
            readings = batches.iter().map(|b| b.readings.len()).sum::<usize>(),
            "Fetched utility usage"
        );
        Ok(batches)
    }
}

fn parse_usage(response: &PollResponse, channel: Channel) -> FetcherResult<Vec<SourceBatch>> {
    let services = match response.data.get(&channel.to_string()) {
        Some(Some(services)) => services,
        _ => return Ok(Vec::new()),
    };

    let mut batches = Vec::new();
    for service in services {
        if !service.meters.is_empty() && !service.series.is_empty() {
            for meter in &service.meters {
                let Some(meter_number) = meter.meter_number.as_ref().and_then(id_string) else {
                    warn!(channel = %channel, "Skipping meter without a number");
                    continue;
                };

                let points = service
                    .series
                    .iter()
                    .find(|s| s.name.as_ref().and_then(id_string).as_deref() == Some(meter_number.as_str()))
                    .map(|s| s.data.as_slice())
                    .unwrap_or_default();

                let mut batch = SourceBatch::new(meter_number);
                if let Some(unit) = &meter.unit_of_measure {
                    batch.metadata.insert("unitOfMeasure".into(), json!(unit));
                }
                if let Some(direction) = &meter.flow_direction {
                    batch.metadata.insert("flowDirection".into(), json!(direction));
                }
                batch
                    .metadata
                    .insert("isNetMeter".into(), json!(meter.is_net_meter.unwrap_or(false)));
                batch.readings = parse_points(points)?;

                if !batch.readings.is_empty() {
                    batches.push(batch);
                }
            }
        } else if channel == Channel::Water {
            // Service-level fallback; the undated "current" month summary is ignored
            let source_id = service
                .service_location_number
                .as_ref()
                .and_then(id_string)
                .unwrap_or_else(|| "UNKNOWN".to_string());

            let mut batch = SourceBatch::new(source_id);
            batch.metadata.insert(
                "unitOfMeasure".into(),
                json!(service.unit_of_measure.as_deref().unwrap_or("GAL")),
            );
            batch.metadata.insert("flowDirection".into(), json!("DELIVERED"));
            batch.metadata.insert("isNetMeter".into(), json!(false));
            batch.readings = parse_points(&service.data)?;

            if !batch.readings.is_empty() {
                batches.push(batch);
            }
        }
    }

    Ok(batches)
}

fn parse_points(points: &[Value]) -> FetcherResult<Vec<Reading>> {
    let mut readings = Vec::with_capacity(points.len());
    for point in points {
        let Some(x) = point.get("x").and_then(as_millis) else {
            continue;
        };
        let usage = point.get("y").cloned().unwrap_or(Value::Null);
        let reading = Reading::single(x, "usage", usage).map_err(FetcherError::InvalidResponse)?;
        readings.push(reading);
    }
    Ok(readings)
}

fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// Render a numeric or string identifier as a string
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
