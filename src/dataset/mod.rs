//! Dataset model and validation
//!
//! A [`Dataset`] holds every [`Series`] of one provider and serializes as a
//! JSON object mapping channel name to an array of per-source series:
//!
//! ```json
//! {
//!   "ELECTRIC": [
//!     {
//!       "source_id": "E-100",
//!       "metadata": {"unitOfMeasure": "KWH"},
//!       "total_readings": 1,
//!       "readings": [{"timestamp": 1735257600000, "datetime": "2024-12-27T00:00:00Z", "usage": 1.25}]
//!     }
//!   ]
//! }
//! ```
//!
//! - [`path`] - Current and backup file locations
//! - [`store`] - Atomic reads and writes

use crate::{Channel, Reading};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod path;
pub mod store;

pub use path::DatasetPaths;
pub use store::{DatasetStore, StagedWrite, WriteReceipt};

/// Dataset storage errors
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// I/O error outside the write path (reading, directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Present file that cannot be trusted
    #[error("corrupt dataset {path}: {reason}")]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Parse or validation failure
        reason: String,
    },

    /// Write failed before the current file was replaced
    #[error("partial write to {path}: {reason}")]
    PartialWrite {
        /// Target file
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Backup copy failed after the current file was committed
    #[error("backup write to {path} failed: {reason}")]
    Backup {
        /// Backup file
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Result type for dataset operations
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Readings of one source within a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Meter number or thermostat identifier
    pub source_id: String,
    /// Unit of measure, flow direction and similar descriptors
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Number of readings, kept for quick validation
    pub total_readings: usize,
    /// Readings, strictly increasing by timestamp
    pub readings: Vec<Reading>,
}

impl Series {
    /// Create an empty series
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            metadata: BTreeMap::new(),
            total_readings: 0,
            readings: Vec::new(),
        }
    }

    /// Timestamp of the newest reading
    pub fn last_timestamp(&self) -> Option<i64> {
        self.readings.last().map(|r| r.timestamp)
    }

    /// Check count, ordering and datetime consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.total_readings != self.readings.len() {
            return Err(format!(
                "series {}: total_readings is {} but {} readings are stored",
                self.source_id,
                self.total_readings,
                self.readings.len()
            ));
        }

        for pair in self.readings.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(format!(
                    "series {}: timestamp {} follows {} (unsorted or duplicate)",
                    self.source_id, pair[1].timestamp, pair[0].timestamp
                ));
            }
        }

        for reading in &self.readings {
            reading
                .validate()
                .map_err(|e| format!("series {}: {e}", self.source_id))?;
        }

        Ok(())
    }
}

/// All series of one provider, keyed by channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    channels: BTreeMap<Channel, Vec<Series>>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Series of a channel
    pub fn series(&self, channel: Channel) -> &[Series] {
        self.channels.get(&channel).map(Vec::as_slice).unwrap_or_default()
    }

    /// Series of a channel and source
    pub fn find(&self, channel: Channel, source_id: &str) -> Option<&Series> {
        self.series(channel).iter().find(|s| s.source_id == source_id)
    }

    /// Series of a channel and source, created empty if absent
    pub fn entry(&mut self, channel: Channel, source_id: &str) -> &mut Series {
        let list = self.channels.entry(channel).or_default();
        match list.iter().position(|s| s.source_id == source_id) {
            Some(index) => &mut list[index],
            None => {
                list.push(Series::new(source_id));
                let last = list.len() - 1;
                &mut list[last]
            }
        }
    }

    /// Replace (or add) a series
    pub fn insert(&mut self, channel: Channel, series: Series) {
        let list = self.channels.entry(channel).or_default();
        match list.iter_mut().find(|s| s.source_id == series.source_id) {
            Some(slot) => *slot = series,
            None => list.push(series),
        }
    }

    /// Channels present in the dataset
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    /// Newest timestamp across all series of a channel
    pub fn last_timestamp(&self, channel: Channel) -> Option<i64> {
        self.series(channel)
            .iter()
            .filter_map(Series::last_timestamp)
            .max()
    }

    /// Total readings across all channels
    pub fn total_readings(&self) -> usize {
        self.channels
            .values()
            .flatten()
            .map(|s| s.readings.len())
            .sum()
    }

    /// Validate every series; duplicate source ids within a channel are rejected
    pub fn validate(&self) -> Result<(), String> {
        for (channel, list) in &self.channels {
            for (index, series) in list.iter().enumerate() {
                if list[..index].iter().any(|s| s.source_id == series.source_id) {
                    return Err(format!(
                        "{channel}: source {} appears more than once",
                        series.source_id
                    ));
                }
                series.validate().map_err(|e| format!("{channel}: {e}"))?;
            }
        }
        Ok(())
    }
}
