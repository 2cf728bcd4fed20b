//! Whole-experiment rollups per node and per region.
//!
//! A rollup's elapsed time in one direction is the span between the first
//! and last event in that direction. When that span is not positive the
//! rate is left undefined, and undefined rates never enter a mean.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::types::*;

/// Running totals for one direction of one entity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DirectionTotals {
    pub bytes: u64,
    pub events: usize,
    pub first: Option<TraceTime>,
    pub last: Option<TraceTime>,
}

impl DirectionTotals {
    fn add(&mut self, event: &TransferEvent) {
        self.bytes = self.bytes.saturating_add(event.bytes);
        self.events += 1;
        self.first = Some(self.first.map_or(event.timestamp, |t| t.min(event.timestamp)));
        self.last = Some(self.last.map_or(event.timestamp, |t| t.max(event.timestamp)));
    }

    fn merge(&mut self, other: DirectionTotals) {
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.events += other.events;
        self.first = self.first.into_iter().chain(other.first).min();
        self.last = self.last.into_iter().chain(other.last).max();
    }

    /// Seconds between the first and last event, when there was one
    pub fn elapsed_seconds(&self) -> Option<f64> {
        Some(seconds_between(self.first?, self.last?))
    }

    /// Mean rate over the elapsed time; `None` when no time elapsed
    pub fn rate_mbps(&self) -> Option<f64> {
        mbps(self.bytes, self.elapsed_seconds()?)
    }
}

#[derive(Debug, Clone, Default)]
struct RollupAccumulator {
    region: Option<String>,
    sent: DirectionTotals,
    received: DirectionTotals,
}

impl RollupAccumulator {
    fn add(&mut self, event: &TransferEvent) {
        match event.direction {
            Direction::Sent => self.sent.add(event),
            Direction::Received => self.received.add(event),
        }
    }

    fn merge(&mut self, other: RollupAccumulator) {
        if self.region.is_none() {
            self.region = other.region;
        }
        self.sent.merge(other.sent);
        self.received.merge(other.received);
    }

    fn finish(self, key: String) -> Rollup {
        let first_seen = self.sent.first.into_iter().chain(self.received.first).min();
        let last_seen = self.sent.last.into_iter().chain(self.received.last).max();

        Rollup {
            key,
            region: self.region,
            total_bytes_sent: self.sent.bytes,
            total_bytes_received: self.received.bytes,
            sent_events: self.sent.events,
            received_events: self.received.events,
            first_seen,
            last_seen,
            total_time_sent_secs: self.sent.elapsed_seconds(),
            total_time_received_secs: self.received.elapsed_seconds(),
            upload_mbps: self.sent.rate_mbps(),
            download_mbps: self.received.rate_mbps(),
        }
    }
}

fn merge_accumulators(
    mut into: BTreeMap<String, RollupAccumulator>,
    from: BTreeMap<String, RollupAccumulator>,
) -> BTreeMap<String, RollupAccumulator> {
    for (key, acc) in from {
        into.entry(key).or_default().merge(acc);
    }
    into
}

/// Fold sent and received events into one accumulator per key
fn rollup_by<F>(sent: &[TransferEvent], received: &[TransferEvent], key_of: F, with_region: bool) -> Vec<Rollup>
where
    F: Fn(&TransferEvent) -> &str + Sync,
{
    let accumulators = sent
        .par_iter()
        .chain(received.par_iter())
        .fold(BTreeMap::new, |mut acc: BTreeMap<String, RollupAccumulator>, event| {
            let entry = acc.entry(key_of(event).to_string()).or_default();
            if with_region && entry.region.is_none() {
                entry.region = Some(event.region.clone());
            }
            entry.add(event);
            acc
        })
        .reduce(BTreeMap::new, merge_accumulators);

    accumulators
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

/// One rollup per node that has at least one event, ordered by node id
pub fn rollup_by_node(sent: &[TransferEvent], received: &[TransferEvent]) -> Vec<Rollup> {
    rollup_by(sent, received, |e| e.node_id.as_str(), true)
}

/// One rollup per region, grouping nodes by the region they were tagged with
pub fn rollup_by_region(sent: &[TransferEvent], received: &[TransferEvent]) -> Vec<Rollup> {
    rollup_by(sent, received, |e| e.region.as_str(), false)
}

/// Directions that had events but no elapsed time, across all rollups
pub fn degenerate_rollups(rollups: &[Rollup]) -> usize {
    rollups
        .iter()
        .map(|r| {
            usize::from(r.sent_events > 0 && r.upload_mbps.is_none())
                + usize::from(r.received_events > 0 && r.download_mbps.is_none())
        })
        .sum()
}

/// Byte totals, sent or received, that hit `u64::MAX`
pub fn saturated_rollups(rollups: &[Rollup]) -> usize {
    rollups
        .iter()
        .map(|r| usize::from(r.total_bytes_sent == u64::MAX) + usize::from(r.total_bytes_received == u64::MAX))
        .sum()
}

/// Unweighted mean of per-entity rates.
///
/// Each defined rate counts once regardless of bytes or duration, so this
/// is not the aggregate network throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanRates {
    pub upload_mbps: Option<f64>,
    pub download_mbps: Option<f64>,
    /// Entities with a defined upload rate
    pub upload_entities: usize,
    /// Entities with a defined download rate
    pub download_entities: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> (Option<f64>, usize) {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        (None, 0)
    } else {
        (Some(sum / count as f64), count)
    }
}

pub fn mean_rates(rollups: &[Rollup]) -> MeanRates {
    let (upload_mbps, upload_entities) = mean(rollups.iter().filter_map(|r| r.upload_mbps));
    let (download_mbps, download_entities) = mean(rollups.iter().filter_map(|r| r.download_mbps));

    MeanRates {
        upload_mbps,
        download_mbps,
        upload_entities,
        download_entities,
    }
}
