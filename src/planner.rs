//! Fetch window planning
//!
//! Decides, per channel, whether a run needs a full collection or only an
//! incremental refresh, and over which time range.
//!
//! - **Full**: no stored series for the channel, an empty series, or a forced
//!   full run. Starts `period` days back, or at the provider's earliest
//!   available data for [`AnalysisPeriod::AllHistory`].
//! - **Incremental**: starts one overlap margin before the newest stored
//!   reading so late or corrected readings are picked up again.

use crate::dataset::Dataset;
use crate::Channel;
use chrono::Duration;
use serde::Serialize;
use std::str::FromStr;

/// Days of history used when the earliest available data is unknown
pub const FALLBACK_HISTORY_DAYS: i64 = 30;

/// How far back a full collection reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPeriod {
    /// Everything the provider still serves
    AllHistory,
    /// A fixed number of days before now
    Days(u32),
}

impl FromStr for AnalysisPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-1" || s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("all history") {
            return Ok(AnalysisPeriod::AllHistory);
        }
        // Accepts the Display form ("7 days") as well as a bare count
        match s.trim_end_matches("days").trim_end().parse::<u32>() {
            Ok(days) if days > 0 => Ok(AnalysisPeriod::Days(days)),
            _ => Err(format!(
                "Invalid period: {s} (expected a positive day count or -1 for all history)"
            )),
        }
    }
}

impl std::fmt::Display for AnalysisPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisPeriod::AllHistory => f.write_str("all history"),
            AnalysisPeriod::Days(days) => write!(f, "{days} days"),
        }
    }
}

/// Collection mode of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Collect the whole analysis period
    Full,
    /// Refresh from the newest stored reading
    Incremental,
}

impl std::fmt::Display for WindowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowMode::Full => f.write_str("full"),
            WindowMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Time range to request for one channel (and optionally one source)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    /// Channel to fetch
    pub channel: Channel,
    /// Source the window was planned for; `None` after coalescing
    pub source_id: Option<String>,
    /// Inclusive start, Unix milliseconds
    pub start_time: i64,
    /// Inclusive end, Unix milliseconds
    pub end_time: i64,
    /// Full or incremental
    pub mode: WindowMode,
}

/// Computes fetch windows from stored data and the clock
#[derive(Debug, Clone)]
pub struct WindowPlanner {
    period: AnalysisPeriod,
    overlap: Duration,
    force_full: bool,
}

impl WindowPlanner {
    /// Create a planner
    ///
    /// # Arguments
    /// * `period` - Reach of full collections
    /// * `overlap` - Margin re-fetched before the newest stored reading
    pub fn new(period: AnalysisPeriod, overlap: Duration) -> Self {
        Self {
            period,
            overlap,
            force_full: false,
        }
    }

    /// Always plan full windows
    pub fn with_force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    /// Configured analysis period
    pub fn period(&self) -> AnalysisPeriod {
        self.period
    }

    /// Whether planning `channel` needs the provider's earliest-available bound
    pub fn needs_earliest(&self, dataset: Option<&Dataset>, channel: Channel) -> bool {
        self.period == AnalysisPeriod::AllHistory
            && self
                .plan_channel(dataset, channel, 0, Some(0))
                .iter()
                .any(|w| w.mode == WindowMode::Full)
    }

    /// Windows for every source of `channel`
    ///
    /// # Arguments
    /// * `dataset` - Stored data, `None` on first run
    /// * `now_ms` - Current time, Unix milliseconds
    /// * `earliest` - Earliest data the provider serves, if known
    pub fn plan_channel(
        &self,
        dataset: Option<&Dataset>,
        channel: Channel,
        now_ms: i64,
        earliest: Option<i64>,
    ) -> Vec<FetchWindow> {
        let series = dataset.map(|d| d.series(channel)).unwrap_or_default();

        if self.force_full || series.is_empty() {
            return vec![self.full_window(channel, None, now_ms, earliest)];
        }

        series
            .iter()
            .map(|s| match s.last_timestamp() {
                Some(last) => self.incremental_window(channel, Some(s.source_id.clone()), last, now_ms),
                None => self.full_window(channel, Some(s.source_id.clone()), now_ms, earliest),
            })
            .collect()
    }

    fn full_window(
        &self,
        channel: Channel,
        source_id: Option<String>,
        now_ms: i64,
        earliest: Option<i64>,
    ) -> FetchWindow {
        let start_time = match self.period {
            AnalysisPeriod::Days(days) => {
                let start = now_ms.saturating_sub(Duration::days(i64::from(days)).num_milliseconds());
                earliest.map_or(start, |bound| start.max(bound))
            }
            AnalysisPeriod::AllHistory => earliest.unwrap_or_else(|| {
                now_ms.saturating_sub(Duration::days(FALLBACK_HISTORY_DAYS).num_milliseconds())
            }),
        };

        FetchWindow {
            channel,
            source_id,
            start_time: start_time.min(now_ms),
            end_time: now_ms,
            mode: WindowMode::Full,
        }
    }

    fn incremental_window(
        &self,
        channel: Channel,
        source_id: Option<String>,
        last_timestamp: i64,
        now_ms: i64,
    ) -> FetchWindow {
        let overlap = self.overlap.num_milliseconds();
        let mut start_time = last_timestamp.saturating_sub(overlap);
        // Stored data from the future (clock skew) still gets a refresh
        if start_time >= now_ms {
            start_time = now_ms.saturating_sub(overlap);
        }

        FetchWindow {
            channel,
            source_id,
            start_time,
            end_time: now_ms,
            mode: WindowMode::Incremental,
        }
    }
}

/// Collapse the windows of one channel into a single request span
///
/// The span runs from the earliest start to the latest end and is full if any
/// input window is full.
pub fn coalesce(windows: &[FetchWindow]) -> Option<FetchWindow> {
    let first = windows.first()?;
    let mut span = FetchWindow {
        channel: first.channel,
        source_id: None,
        start_time: first.start_time,
        end_time: first.end_time,
        mode: first.mode,
    };

    for window in &windows[1..] {
        span.start_time = span.start_time.min(window.start_time);
        span.end_time = span.end_time.max(window.end_time);
        if window.mode == WindowMode::Full {
            span.mode = WindowMode::Full;
        }
    }
    if windows.len() == 1 {
        span.source_id = first.source_id.clone();
    }
    Some(span)
}
