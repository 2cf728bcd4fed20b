//! One-way message latency from paired send/receive timestamps.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::timestamp::parse_timestamp;
use super::types::*;
use crate::ip::RegionResolver;

/// Latency samples plus the records that could not yield one
#[derive(Debug, Clone, Default)]
pub struct LatencyReport {
    pub samples: Vec<LatencySample>,
    pub missing_fields: usize,
    pub invalid_timestamps: usize,
    /// Samples whose peer address has no known region
    pub unresolved_regions: usize,
}

impl LatencyReport {
    fn merged(mut self, other: LatencyReport) -> Self {
        self.samples.extend(other.samples);
        self.missing_fields += other.missing_fields;
        self.invalid_timestamps += other.invalid_timestamps;
        self.unresolved_regions += other.unresolved_regions;
        self
    }

    /// Skips in the same shape as ingestion reports them
    pub fn skips(&self) -> SkipCounters {
        SkipCounters {
            missing_fields: self.missing_fields,
            invalid_timestamps: self.invalid_timestamps,
            unresolved_regions: self.unresolved_regions,
            ..Default::default()
        }
    }
}

enum Outcome {
    Sample(LatencySample, bool),
    Rejected(RecordRejection),
}

fn latency_sample<R: RegionResolver + ?Sized>(record: &LatencyRecord, resolver: &R) -> Outcome {
    let (Some(node_id), Some(peer_id), Some(ip_address), Some(send), Some(receive)) = (
        &record.node_id,
        &record.peer_id,
        &record.ip_address,
        &record.send_time,
        &record.receive_time,
    ) else {
        return Outcome::Rejected(RecordRejection::MissingField("latency"));
    };

    let (Some(send_time), Some(receive_time)) = (parse_timestamp(send), parse_timestamp(receive)) else {
        return Outcome::Rejected(RecordRejection::InvalidTimestamp);
    };

    let (region, resolved) = match resolver.lookup(ip_address) {
        Some(region) => (region, true),
        None => (UNKNOWN_REGION.to_string(), false),
    };

    Outcome::Sample(
        LatencySample {
            node_id: node_id.clone(),
            peer_id: peer_id.clone(),
            ip_address: ip_address.clone(),
            region,
            send_time,
            receive_time,
            latency_ms: seconds_between(send_time, receive_time) * 1_000.0,
        },
        resolved,
    )
}

/// Latency for every record carrying all of node_id, peer_id, ip_address,
/// send_time and receive_time.
///
/// Incomplete records are dropped and counted. Negative latencies are kept.
/// The region of a sample is the region of its peer address.
pub fn compute_latencies<R: RegionResolver + ?Sized>(records: &[LatencyRecord], resolver: &R) -> LatencyReport {
    let report = records
        .par_iter()
        .fold(LatencyReport::default, |mut report, record| {
            match latency_sample(record, resolver) {
                Outcome::Sample(sample, resolved) => {
                    if !resolved {
                        report.unresolved_regions += 1;
                    }
                    report.samples.push(sample);
                }
                Outcome::Rejected(RecordRejection::MissingField(_)) => report.missing_fields += 1,
                Outcome::Rejected(RecordRejection::InvalidTimestamp) => report.invalid_timestamps += 1,
            }
            report
        })
        .reduce(LatencyReport::default, LatencyReport::merged);

    let negative = report.samples.iter().filter(|s| s.latency_ms < 0.0).count();
    if negative > 0 {
        log::warn!("{} latency samples are negative (clock skew?)", negative);
    }
    log::debug!(
        "Computed {} latency samples ({} incomplete, {} bad timestamps)",
        report.samples.len(),
        report.missing_fields,
        report.invalid_timestamps
    );

    report
}

/// Mean latency from one node to one peer address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerLatency {
    pub node_id: String,
    pub ip_address: String,
    pub region: String,
    pub mean_latency_ms: f64,
    pub samples: usize,
}

/// Mean latency per node and peer `(ip_address, region)`.
///
/// Ordered by node, then by mean latency ascending.
pub fn mean_latency_by_peer(samples: &[LatencySample]) -> Vec<PeerLatency> {
    let mut groups: BTreeMap<(&str, &str, &str), (f64, usize)> = BTreeMap::new();
    for sample in samples {
        let entry = groups
            .entry((sample.node_id.as_str(), sample.ip_address.as_str(), sample.region.as_str()))
            .or_insert((0.0, 0));
        entry.0 += sample.latency_ms;
        entry.1 += 1;
    }

    let mut peers: Vec<PeerLatency> = groups
        .into_iter()
        .map(|((node_id, ip_address, region), (sum, count))| PeerLatency {
            node_id: node_id.to_string(),
            ip_address: ip_address.to_string(),
            region: region.to_string(),
            mean_latency_ms: sum / count as f64,
            samples: count,
        })
        .collect();

    peers.sort_by(|a, b| {
        a.node_id
            .cmp(&b.node_id)
            .then(a.mean_latency_ms.total_cmp(&b.mean_latency_ms))
    });
    peers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::NoRegions;
    use std::collections::HashMap;

    fn record(send: &str, receive: &str) -> LatencyRecord {
        LatencyRecord {
            source_node: "n1".to_string(),
            node_region: "R1".to_string(),
            node_id: Some("n1".to_string()),
            peer_id: Some("p1".to_string()),
            ip_address: Some("10.0.0.2".to_string()),
            send_time: Some(send.to_string()),
            receive_time: Some(receive.to_string()),
        }
    }

    #[test]
    fn test_half_second_latency_across_formats() {
        let pairs = [
            ("2024-01-01T00:00:00.000Z", "2024-01-01T00:00:00.500Z"),
            ("2024-01-01T00:00:00.000000Z", "2024-01-01T00:00:00.500000Z"),
            ("2024-01-01T00:00:00.000000000Z", "2024-01-01T00:00:00.500000000Z"),
            ("2024-01-01T00:00:00.000+00:00", "2024-01-01T00:00:00.500+00:00"),
            ("2024-01-01T00:00:00.000Z", "2024-01-01T00:00:00.500000000+00:00"),
        ];
        for (send, receive) in pairs {
            let report = compute_latencies(&[record(send, receive)], &NoRegions);
            assert_eq!(report.samples.len(), 1, "{} / {}", send, receive);
            assert!((report.samples[0].latency_ms - 500.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_negative_latency_is_kept() {
        let report = compute_latencies(
            &[record("2024-01-01T00:00:01Z", "2024-01-01T00:00:00.750Z")],
            &NoRegions,
        );
        assert_eq!(report.samples.len(), 1);
        assert!((report.samples[0].latency_ms + 250.0).abs() < 1e-3);
    }

    #[test]
    fn test_incomplete_records_are_dropped() {
        let mut missing_peer = record("2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z");
        missing_peer.peer_id = None;
        let mut missing_node = record("2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z");
        missing_node.node_id = None;
        let bad_time = record("2024-01-01T00:00:00Z", "soon");

        let report = compute_latencies(&[missing_peer, missing_node, bad_time], &NoRegions);
        assert!(report.samples.is_empty());
        assert_eq!(report.missing_fields, 2);
        assert_eq!(report.invalid_timestamps, 1);
    }

    #[test]
    fn test_region_is_the_peers() {
        let mut regions = HashMap::new();
        regions.insert("10.0.0.2".to_string(), "sgp1".to_string());

        let report = compute_latencies(
            &[record("2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z")],
            &regions,
        );
        assert_eq!(report.samples[0].region, "sgp1");
        assert_eq!(report.unresolved_regions, 0);

        let report = compute_latencies(
            &[record("2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z")],
            &NoRegions,
        );
        assert_eq!(report.samples[0].region, UNKNOWN_REGION);
        assert_eq!(report.unresolved_regions, 1);
    }

    #[test]
    fn test_mean_latency_by_peer_sorted() {
        let mut slow = record("2024-01-01T00:00:00Z", "2024-01-01T00:00:00.300Z");
        slow.ip_address = Some("10.0.0.3".to_string());
        let records = vec![
            record("2024-01-01T00:00:00Z", "2024-01-01T00:00:00.100Z"),
            record("2024-01-01T00:00:00Z", "2024-01-01T00:00:00.200Z"),
            slow,
        ];
        let report = compute_latencies(&records, &NoRegions);
        let peers = mean_latency_by_peer(&report.samples);

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip_address, "10.0.0.2");
        assert!((peers[0].mean_latency_ms - 150.0).abs() < 1e-6);
        assert_eq!(peers[0].samples, 2);
        assert_eq!(peers[1].ip_address, "10.0.0.3");
        assert!((peers[1].mean_latency_ms - 300.0).abs() < 1e-6);
    }
}
