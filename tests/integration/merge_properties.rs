//! Merge engine properties over generated batches

use std::collections::BTreeMap;
use utility_sync::dataset::Series;
use utility_sync::merge::{merge, CollisionPolicy};
use utility_sync::Reading;

const BASE: i64 = 1735257600000;
const HOUR: i64 = 3_600_000;

/// Small deterministic generator so failures are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn batch(&mut self, len: usize, span_hours: u64) -> Vec<Reading> {
        (0..len)
            .map(|_| {
                let hour = (self.next() % span_hours) as i64;
                let value = (self.next() % 1000) as f64 / 100.0;
                Reading::single(BASE + hour * HOUR, "usage", value).unwrap()
            })
            .collect()
    }
}

fn series_from(readings: Vec<Reading>) -> Series {
    let (series, _) = merge(Series::new("E-1"), readings, CollisionPolicy::IncomingWins);
    series
}

fn assert_well_formed(series: &Series) {
    assert_eq!(series.total_readings, series.readings.len());
    assert!(series
        .readings
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));
    assert!(series.validate().is_ok());
}

#[test]
fn merged_series_are_strictly_ordered_without_duplicates() {
    let mut rng = Lcg(7);
    for _ in 0..50 {
        let existing = series_from(rng.batch(40, 96));
        for policy in [CollisionPolicy::IncomingWins, CollisionPolicy::ExistingWins] {
            let (merged, stats) = merge(existing.clone(), rng.batch(60, 120), policy);
            assert_well_formed(&merged);
            assert_eq!(merged.readings.len(), existing.readings.len() + stats.added);
        }
    }
}

#[test]
fn merging_the_same_batch_twice_changes_nothing() {
    let mut rng = Lcg(42);
    for _ in 0..50 {
        let existing = series_from(rng.batch(30, 72));
        let batch = rng.batch(30, 96);
        for policy in [CollisionPolicy::IncomingWins, CollisionPolicy::ExistingWins] {
            let (once, _) = merge(existing.clone(), batch.clone(), policy);
            let (twice, stats) = merge(once.clone(), batch.clone(), policy);
            assert_eq!(once, twice);
            assert!(!stats.changed());
        }
    }
}

#[test]
fn policy_decides_every_collision() {
    let mut rng = Lcg(1234);
    for _ in 0..50 {
        let existing = series_from(rng.batch(40, 48));
        let incoming = rng.batch(40, 48);

        // Last occurrence per timestamp is what the batch means
        let mut expected_incoming = BTreeMap::new();
        for reading in &incoming {
            expected_incoming.insert(reading.timestamp, reading.clone());
        }

        let (kept, _) = merge(existing.clone(), incoming.clone(), CollisionPolicy::ExistingWins);
        let (replaced, _) = merge(existing.clone(), incoming, CollisionPolicy::IncomingWins);

        for reading in &existing.readings {
            assert!(kept.readings.contains(reading));
        }
        for reading in expected_incoming.values() {
            assert!(replaced.readings.contains(reading));
        }
    }
}

#[test]
fn late_correction_example() {
    let existing = series_from(vec![Reading::single(BASE, "usage", 1.25).unwrap()]);
    let incoming = vec![
        Reading::single(BASE, "usage", 1.30).unwrap(),
        Reading::single(BASE + HOUR, "usage", 2.00).unwrap(),
    ];

    let (merged, stats) = merge(existing, incoming, CollisionPolicy::IncomingWins);
    assert_eq!(merged.total_readings, 2);
    assert_eq!(merged.readings[0].value("usage"), Some(&serde_json::json!(1.30)));
    assert_eq!(merged.readings[1].value("usage"), Some(&serde_json::json!(2.00)));
    assert_eq!(stats.added, 1);
    assert_eq!(stats.updated, 1);
}
