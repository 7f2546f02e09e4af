//! Sync reports and status tracking

use super::{ErrorKind, SyncError};
use crate::merge::MergeStats;
use crate::planner::{FetchWindow, WindowMode};
use crate::{format_datetime, Channel, Provider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// New or corrected readings were merged
    Updated,
    /// The fetch brought nothing new
    Unchanged,
    /// The fetch failed
    Failed,
    /// Not attempted (shutdown or provider abort)
    Skipped,
}

/// Report for one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    /// Channel
    pub channel: Channel,
    /// Outcome
    pub status: ChannelStatus,
    /// Window mode, once planned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<WindowMode>,
    /// Requested start, Unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// Requested end, Unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Sources that returned data
    pub sources: usize,
    /// Readings received from the provider
    pub fetched: usize,
    /// Merge outcome
    pub stats: MergeStats,
    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelReport {
    /// Report for a channel that has not run
    pub fn skipped(channel: Channel) -> Self {
        Self {
            channel,
            status: ChannelStatus::Skipped,
            mode: None,
            start_time: None,
            end_time: None,
            sources: 0,
            fetched: 0,
            stats: MergeStats::default(),
            error_kind: None,
            error: None,
        }
    }

    /// Report for a planned window
    pub fn planned(window: &FetchWindow) -> Self {
        Self {
            mode: Some(window.mode),
            start_time: Some(window.start_time),
            end_time: Some(window.end_time),
            ..Self::skipped(window.channel)
        }
    }

    /// Mark as failed
    pub fn fail(&mut self, error: &SyncError) {
        self.status = ChannelStatus::Failed;
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
    }

    /// Whether the channel failed
    pub fn is_failure(&self) -> bool {
        self.status == ChannelStatus::Failed
    }
}

/// Report for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    /// Provider
    pub provider: Provider,
    /// Per-channel outcomes
    pub channels: Vec<ChannelReport>,
    /// Current file written by this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<PathBuf>,
    /// Backup written by this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// Provider-level failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Provider-level failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderReport {
    /// Empty report for `provider`
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            channels: Vec::new(),
            current: None,
            backup: None,
            error_kind: None,
            error: None,
        }
    }

    /// Record a provider-level failure
    pub fn fail(&mut self, error: &SyncError) {
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
    }

    /// Whether the provider or any of its channels failed
    pub fn has_failures(&self) -> bool {
        self.error_kind.is_some() || self.channels.iter().any(ChannelReport::is_failure)
    }

    /// Merge totals across channels
    pub fn totals(&self) -> MergeStats {
        let mut totals = MergeStats::default();
        for channel in &self.channels {
            totals += channel.stats;
        }
        totals
    }

    fn error_kinds(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.error_kind
            .into_iter()
            .chain(self.channels.iter().filter_map(|c| c.error_kind))
    }
}

/// Report for a whole run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Whether a shutdown request cut the run short
    pub interrupted: bool,
    /// Per-provider outcomes
    pub providers: Vec<ProviderReport>,
}

impl SyncReport {
    /// Whether anything failed
    pub fn has_failures(&self) -> bool {
        self.providers.iter().any(ProviderReport::has_failures)
    }

    /// Process exit status: 0 on success, otherwise the most severe failure
    pub fn exit_code(&self) -> i32 {
        let worst = self
            .providers
            .iter()
            .flat_map(ProviderReport::error_kinds)
            .max_by_key(ErrorKind::severity);

        match worst {
            Some(kind) => kind.exit_code(),
            None if self.interrupted => ErrorKind::Interrupted.exit_code(),
            None => 0,
        }
    }

    /// Multi-line summary for terminals
    pub fn render_human(&self) -> String {
        let mut lines = Vec::new();
        for provider in &self.providers {
            let totals = provider.totals();
            lines.push(format!(
                "{}: {} added, {} updated, {} unchanged",
                provider.provider, totals.added, totals.updated, totals.unchanged
            ));
            if let (Some(kind), Some(error)) = (provider.error_kind, &provider.error) {
                lines.push(format!("  [FAILED:{kind}] {error}"));
            }

            for channel in &provider.channels {
                let range = match (channel.start_time, channel.end_time) {
                    (Some(start), Some(end)) => format!(
                        " {} to {}",
                        format_datetime(start).unwrap_or_else(|| start.to_string()),
                        format_datetime(end).unwrap_or_else(|| end.to_string())
                    ),
                    _ => String::new(),
                };
                let mode = channel.mode.map(|m| format!(" ({m})")).unwrap_or_default();
                let mut line = format!(
                    "  {:<21} {:<9}{mode}{range}",
                    channel.channel.to_string(),
                    format!("{:?}", channel.status).to_lowercase(),
                );
                if channel.status == ChannelStatus::Updated || channel.status == ChannelStatus::Unchanged {
                    line.push_str(&format!(
                        " | {} sources, {} fetched, +{} ~{}",
                        channel.sources, channel.fetched, channel.stats.added, channel.stats.updated
                    ));
                }
                if let Some(error) = &channel.error {
                    line.push_str(&format!(" | {error}"));
                }
                lines.push(line);
            }

            if let Some(current) = &provider.current {
                lines.push(format!("  wrote {}", current.display()));
            }
            if let Some(backup) = &provider.backup {
                lines.push(format!("  backup {}", backup.display()));
            }
        }
        if self.interrupted {
            lines.push("Run interrupted by shutdown request".to_string());
        }
        lines.join("\n")
    }
}
