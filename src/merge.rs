//! Dedup-merge of fetched readings into existing series
//!
//! Readings are keyed by timestamp. The untouched prefix of the existing
//! series stays in place; only the tail overlapping the incoming batch is
//! rebuilt, so an incremental run costs `O(k log k + overlap)` for a batch of
//! `k` readings regardless of how much history is stored.

use crate::dataset::{Dataset, Series};
use crate::fetcher::SourceBatch;
use crate::{Channel, Reading};
use serde::Serialize;
use std::str::FromStr;

/// Which reading survives when both sides carry the same timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Newly fetched value replaces the stored one (late corrections)
    #[default]
    IncomingWins,
    /// Stored value is kept
    ExistingWins,
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "incoming" | "incoming-wins" | "remote" => Ok(CollisionPolicy::IncomingWins),
            "existing" | "existing-wins" | "local" => Ok(CollisionPolicy::ExistingWins),
            _ => Err(format!(
                "Invalid collision policy: {s} (expected 'incoming' or 'existing')"
            )),
        }
    }
}

impl std::fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionPolicy::IncomingWins => f.write_str("incoming"),
            CollisionPolicy::ExistingWins => f.write_str("existing"),
        }
    }
}

/// Outcome counts of a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Timestamps not present before
    pub added: usize,
    /// Existing readings replaced by a different incoming value
    pub updated: usize,
    /// Incoming readings that left the series as it was
    pub unchanged: usize,
}

impl MergeStats {
    /// Whether the merge changed the series
    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0
    }
}

impl std::ops::AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Merge `incoming` into `existing`
///
/// The result is sorted by timestamp without duplicates and has
/// `total_readings` refreshed. Duplicates inside `incoming` keep their last
/// occurrence. Merging the same batch twice yields the same series as merging
/// it once.
pub fn merge(
    mut existing: Series,
    mut incoming: Vec<Reading>,
    policy: CollisionPolicy,
) -> (Series, MergeStats) {
    let mut stats = MergeStats::default();

    // Stable sort so "last occurrence" keeps its meaning
    incoming.sort_by_key(|r| r.timestamp);
    let incoming = dedup_keep_last(incoming);

    let Some(first) = incoming.first() else {
        existing.total_readings = existing.readings.len();
        return (existing, stats);
    };

    let split = existing
        .readings
        .partition_point(|r| r.timestamp < first.timestamp);
    let tail = existing.readings.split_off(split);

    let mut merged = Vec::with_capacity(tail.len() + incoming.len());
    let mut tail = tail.into_iter().peekable();
    let mut incoming = incoming.into_iter().peekable();

    loop {
        let next = (
            tail.peek().map(|r| r.timestamp),
            incoming.peek().map(|r| r.timestamp),
        );
        match next {
            (Some(old), Some(new)) if old < new => merged.extend(tail.next()),
            (Some(old), Some(new)) if old > new => {
                stats.added += 1;
                merged.extend(incoming.next());
            }
            (Some(_), Some(_)) => {
                let (Some(old), Some(new)) = (tail.next(), incoming.next()) else {
                    break;
                };
                if old == new || policy == CollisionPolicy::ExistingWins {
                    stats.unchanged += 1;
                    merged.push(old);
                } else {
                    stats.updated += 1;
                    merged.push(new);
                }
            }
            (Some(_), None) => merged.extend(tail.by_ref()),
            (None, Some(_)) => {
                let before = merged.len();
                merged.extend(incoming.by_ref());
                stats.added += merged.len() - before;
            }
            (None, None) => break,
        }
    }

    existing.readings.extend(merged);
    existing.total_readings = existing.readings.len();
    (existing, stats)
}

fn dedup_keep_last(sorted: Vec<Reading>) -> Vec<Reading> {
    let mut out: Vec<Reading> = Vec::with_capacity(sorted.len());
    for reading in sorted {
        match out.last_mut() {
            Some(last) if last.timestamp == reading.timestamp => *last = reading,
            _ => out.push(reading),
        }
    }
    out
}

/// Merge a fetched batch into the matching series of `dataset`
///
/// Source metadata from the batch is layered over the stored metadata.
pub fn merge_batch(
    dataset: &mut Dataset,
    channel: Channel,
    batch: SourceBatch,
    policy: CollisionPolicy,
) -> MergeStats {
    let slot = dataset.entry(channel, &batch.source_id);
    let existing = std::mem::replace(slot, Series::new(batch.source_id.clone()));

    let (mut series, stats) = merge(existing, batch.readings, policy);
    series.metadata.extend(batch.metadata);
    *slot = series;
    stats
}
