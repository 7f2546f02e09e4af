//! Earliest-available data probing
//!
//! Providers only serve a limited, undocumented amount of history. For an
//! all-history collection the probe requests narrow test windows at growing
//! distances into the past and keeps the oldest one that still returns real
//! data.

use super::{ChannelFetcher, FetcherError, FetcherResult};
use crate::auth::AccessToken;
use crate::planner::{FetchWindow, WindowMode, FALLBACK_HISTORY_DAYS};
use crate::Channel;
use chrono::Duration;
use tracing::{debug, info};

/// Days before now at which test windows start
pub const PROBE_OFFSETS_DAYS: [i64; 6] = [30, 90, 180, 365, 540, 730];

/// Width of a test window
pub const PROBE_WINDOW_DAYS: i64 = 30;

/// A test window must return more readings than this to count
pub const PROBE_MIN_READINGS: usize = 10;

/// Pause between test requests
pub const PROBE_PACING: std::time::Duration = std::time::Duration::from_millis(300);

/// Finds how far back a provider serves a channel
#[derive(Debug, Clone)]
pub struct Prober {
    offsets_days: Vec<i64>,
    window_days: i64,
    min_readings: usize,
    pacing: std::time::Duration,
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            offsets_days: PROBE_OFFSETS_DAYS.to_vec(),
            window_days: PROBE_WINDOW_DAYS,
            min_readings: PROBE_MIN_READINGS,
            pacing: PROBE_PACING,
        }
    }
}

impl Prober {
    /// Override the pause between test requests
    pub fn with_pacing(mut self, pacing: std::time::Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Test windows for `channel`, oldest first
    pub fn test_windows(&self, channel: Channel, now_ms: i64) -> Vec<FetchWindow> {
        let mut offsets = self.offsets_days.clone();
        offsets.sort_unstable_by(|a, b| b.cmp(a));

        offsets
            .into_iter()
            .map(|days| {
                let start_time = now_ms - Duration::days(days).num_milliseconds();
                FetchWindow {
                    channel,
                    source_id: None,
                    start_time,
                    end_time: start_time + Duration::days(self.window_days).num_milliseconds(),
                    mode: WindowMode::Full,
                }
            })
            .collect()
    }

    /// Earliest timestamp assumed when probing finds nothing
    pub fn fallback(&self, now_ms: i64) -> i64 {
        now_ms - Duration::days(FALLBACK_HISTORY_DAYS).num_milliseconds()
    }

    /// Probe `channel` and return the earliest available timestamp
    ///
    /// Test windows are tried oldest first; the first one with enough
    /// readings yields its earliest reading. Refused tokens and shutdown
    /// abort the probe, other failures just skip the window.
    pub async fn probe(
        &self,
        fetcher: &dyn ChannelFetcher,
        token: &AccessToken,
        channel: Channel,
        now_ms: i64,
    ) -> FetcherResult<i64> {
        for (index, window) in self.test_windows(channel, now_ms).iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            let batches = match fetcher.fetch(token, window).await {
                Ok(batches) => batches,
                Err(e @ (FetcherError::Unauthorized(_) | FetcherError::Cancelled)) => return Err(e),
                Err(e) => {
                    debug!(channel = %channel, start = window.start_time, error = %e, "Probe window failed, skipping");
                    continue;
                }
            };

            let count: usize = batches.iter().map(|b| b.readings.len()).sum();
            if count > self.min_readings {
                let earliest = batches
                    .iter()
                    .flat_map(|b| b.readings.iter().map(|r| r.timestamp))
                    .min()
                    .unwrap_or(window.start_time);
                info!(channel = %channel, earliest, readings = count, "Probed earliest available data");
                return Ok(earliest);
            }
            debug!(channel = %channel, start = window.start_time, readings = count, "Probe window too sparse");
        }

        let fallback = self.fallback(now_ms);
        info!(channel = %channel, earliest = fallback, "No probe window had data, using fallback");
        Ok(fallback)
    }
}
