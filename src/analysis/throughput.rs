//! Transfer-rate analysis.
//!
//! Two modes are provided:
//!
//! - **Sample mode** derives a rate from each pair of consecutive events of
//!   the same `(node, peer)`: the later event's bytes over the time since the
//!   earlier one.
//! - **Windowed mode** sums bytes into fixed-width, epoch-aligned buckets and
//!   divides by the nominal bucket width, giving a regular series that lines
//!   up across nodes.

use std::collections::BTreeMap;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::time_window::{bucket_index, bucket_window, width_micros};
use super::types::*;
use crate::ip::RegionResolver;
use crate::utils::host_of;

/// Default bucket width for windowed throughput
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Discrete samples plus the intervals that could not yield one
#[derive(Debug, Clone, Default)]
pub struct SampleRates {
    pub samples: Vec<ThroughputSample>,
    /// Consecutive events whose time delta was zero, negative or non-finite
    pub degenerate_intervals: usize,
}

/// Rate for each consecutive pair of events in one peer's stream
fn rates_for_peer(mut events: Vec<&TransferEvent>) -> SampleRates {
    // Stable, so simultaneous events keep their canonical order
    events.sort_by_key(|e| e.timestamp);

    let mut rates = SampleRates::default();
    for pair in events.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        let window = TimeWindow::new(prev.timestamp, cur.timestamp);

        match mbps(cur.bytes, window.duration_seconds()) {
            Some(rate_mbps) => rates.samples.push(ThroughputSample {
                node_id: cur.node_id.clone(),
                region: cur.region.clone(),
                peer_id: Some(cur.peer_id.clone()),
                peer_address: Some(cur.ip_address.clone()),
                direction: cur.direction,
                at: cur.timestamp,
                window,
                total_bytes: cur.bytes,
                rate_mbps,
            }),
            None => rates.degenerate_intervals += 1,
        }
    }

    rates
}

/// Sample-mode rates for every `(node, peer)` stream in `events`.
///
/// The first event of a stream yields nothing; neither does a pair whose
/// delta is not positive. Samples come out ordered by node, peer and time.
pub fn sample_rates(events: &[TransferEvent]) -> SampleRates {
    let mut streams: BTreeMap<(&str, &str, Direction), Vec<&TransferEvent>> = BTreeMap::new();
    for event in events {
        streams
            .entry((event.node_id.as_str(), event.peer_id.as_str(), event.direction))
            .or_default()
            .push(event);
    }

    let per_stream: Vec<SampleRates> = streams
        .into_values()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(rates_for_peer)
        .collect();

    let mut rates = SampleRates::default();
    for stream in per_stream {
        rates.samples.extend(stream.samples);
        rates.degenerate_intervals += stream.degenerate_intervals;
    }

    log::debug!(
        "Derived {} throughput samples ({} degenerate intervals)",
        rates.samples.len(),
        rates.degenerate_intervals
    );
    rates
}

/// Key of one windowed bucket
type BucketKey = (Direction, String, Option<String>, i64);

/// Running sum for one bucket
#[derive(Debug, Clone)]
struct BucketSum {
    region: String,
    peer_address: Option<String>,
    total_bytes: u64,
}

fn merge_buckets(
    mut into: BTreeMap<BucketKey, BucketSum>,
    from: BTreeMap<BucketKey, BucketSum>,
) -> BTreeMap<BucketKey, BucketSum> {
    for (key, sum) in from {
        let bytes = sum.total_bytes;
        into.entry(key)
            .and_modify(|s| s.total_bytes = s.total_bytes.saturating_add(bytes))
            .or_insert(sum);
    }
    into
}

/// Windowed rates per node, or per `(node, peer)` when `per_peer` is set.
///
/// Each bucket's rate is its byte total over the full bucket width. Buckets
/// with no events are left out. Returns nothing for a zero width. Totals
/// saturate at `u64::MAX`.
pub fn windowed_rates(events: &[TransferEvent], width: Duration, per_peer: bool) -> Vec<ThroughputSample> {
    let Some(width_us) = width_micros(width) else {
        log::warn!("Ignoring windowed throughput with zero bucket width");
        return Vec::new();
    };

    let buckets = events
        .par_iter()
        .fold(BTreeMap::new, |mut acc: BTreeMap<BucketKey, BucketSum>, event| {
            let peer = per_peer.then(|| event.peer_id.clone());
            let key = (
                event.direction,
                event.node_id.clone(),
                peer,
                bucket_index(event.timestamp, width_us),
            );
            acc.entry(key)
                .and_modify(|s| s.total_bytes = s.total_bytes.saturating_add(event.bytes))
                .or_insert_with(|| BucketSum {
                    region: event.region.clone(),
                    peer_address: per_peer.then(|| event.ip_address.clone()),
                    total_bytes: event.bytes,
                });
            acc
        })
        .reduce(BTreeMap::new, merge_buckets);

    buckets
        .into_iter()
        .filter_map(|((direction, node_id, peer_id, index), sum)| {
            let window = bucket_window(index, width_us)?;
            let rate_mbps = mbps(sum.total_bytes, width.as_secs_f64())?;
            Some(ThroughputSample {
                node_id,
                region: sum.region,
                peer_id,
                peer_address: sum.peer_address,
                direction,
                at: window.start,
                window,
                total_bytes: sum.total_bytes,
                rate_mbps,
            })
        })
        .collect()
}

/// Windows whose byte total hit `u64::MAX`
pub fn saturated_windows(windows: &[ThroughputSample]) -> usize {
    windows.iter().filter(|w| w.total_bytes == u64::MAX).count()
}

/// A sample labelled with the regions at both ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPairSample {
    /// "<node region> -> <peer region>"
    pub pair: String,
    pub at: TraceTime,
    pub rate_mbps: f64,
}

/// Label per-peer samples with their region pair.
///
/// Samples without a peer address, or whose node or peer region is unknown,
/// are left out.
pub fn label_region_pairs<R: RegionResolver + ?Sized>(
    samples: &[ThroughputSample],
    resolver: &R,
) -> Vec<RegionPairSample> {
    samples
        .iter()
        .filter(|s| s.region != UNKNOWN_REGION)
        .filter_map(|s| {
            let peer_region = resolver.lookup(host_of(s.peer_address.as_deref()?))?;
            Some(RegionPairSample {
                pair: format!("{} -> {}", s.region, peer_region),
                at: s.at,
                rate_mbps: s.rate_mbps,
            })
        })
        .collect()
}
