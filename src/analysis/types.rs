//! Core data types for trace analysis.

use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp::parse_timestamp;

/// Trace instant, truncated to microsecond precision
pub type TraceTime = DateTime<Utc>;

/// Region label used when a node or peer address is not in the region table
pub const UNKNOWN_REGION: &str = "Unknown";

/// Per-node latency log file name
pub const LATENCY_FILE: &str = "msg_latency.jsonl";

/// Direction of a transfer, from the point of view of the logging node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Sent, Direction::Received];

    /// Well-known per-node log file holding events of this direction
    pub fn file_name(self) -> &'static str {
        match self {
            Direction::Sent => "timed_sent_bytes.jsonl",
            Direction::Received => "timed_received_bytes.jsonl",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "sent"),
            Direction::Received => write!(f, "received"),
        }
    }
}

/// One line of a sent/received log as it appears on disk.
///
/// Every field is optional so that presence is checked after tagging,
/// not by the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransferLine {
    #[serde(default)]
    pub msg: RawTransferMsg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransferMsg {
    pub time: Option<String>,
    pub bytes: Option<u64>,
    pub peer_id: Option<String>,
    pub ip_address: Option<String>,
}

/// One line of a latency log as it appears on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLatencyLine {
    pub node_id: Option<String>,
    #[serde(default)]
    pub msg: RawLatencyMsg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLatencyMsg {
    pub ip_address: Option<String>,
    pub peer_id: Option<String>,
    pub send_time: Option<String>,
    pub receive_time: Option<String>,
}

/// Why a raw line could not become a tagged record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRejection {
    MissingField(&'static str),
    InvalidTimestamp,
}

/// A participant in the experiment. The region is resolved once, at tagging time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub region: String,
}

/// A validated, tagged sent/received event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub node_id: String,
    pub region: String,
    pub peer_id: String,
    pub ip_address: String,
    pub timestamp: TraceTime,
    pub bytes: u64,
    pub direction: Direction,
}

impl TransferEvent {
    /// Validate a raw line and tag it with its node.
    pub fn from_raw(
        raw: RawTransferLine,
        node: &Node,
        direction: Direction,
    ) -> Result<Self, RecordRejection> {
        let msg = raw.msg;
        let time = msg.time.ok_or(RecordRejection::MissingField("time"))?;
        let bytes = msg.bytes.ok_or(RecordRejection::MissingField("bytes"))?;
        let peer_id = msg.peer_id.ok_or(RecordRejection::MissingField("peer_id"))?;
        let ip_address = msg
            .ip_address
            .ok_or(RecordRejection::MissingField("ip_address"))?;
        let timestamp = parse_timestamp(&time).ok_or(RecordRejection::InvalidTimestamp)?;

        Ok(Self {
            node_id: node.node_id.clone(),
            region: node.region.clone(),
            peer_id,
            ip_address,
            timestamp,
            bytes,
            direction,
        })
    }
}

/// A latency log line tagged with the directory it was read from.
///
/// Field presence is checked by the latency calculator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub source_node: String,
    pub node_region: String,
    pub node_id: Option<String>,
    pub peer_id: Option<String>,
    pub ip_address: Option<String>,
    pub send_time: Option<String>,
    pub receive_time: Option<String>,
}

impl LatencyRecord {
    pub fn tagged(raw: RawLatencyLine, node: &Node) -> Self {
        Self {
            source_node: node.node_id.clone(),
            node_region: node.region.clone(),
            node_id: raw.node_id,
            peer_id: raw.msg.peer_id,
            ip_address: raw.msg.ip_address,
            send_time: raw.msg.send_time,
            receive_time: raw.msg.receive_time,
        }
    }
}

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TraceTime,
    pub end: TraceTime,
}

impl TimeWindow {
    pub fn new(start: TraceTime, end: TraceTime) -> Self {
        Self { start, end }
    }

    pub fn duration_seconds(&self) -> f64 {
        seconds_between(self.start, self.end)
    }

    /// A rate may only be derived from a window with positive duration
    pub fn is_valid(&self) -> bool {
        self.duration_seconds() > 0.0
    }

    pub fn contains(&self, t: TraceTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Signed seconds from `start` to `end` at microsecond resolution
pub fn seconds_between(start: TraceTime, end: TraceTime) -> f64 {
    let delta = end - start;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Megabits per second for `bytes` transferred over `seconds`.
///
/// Returns `None` for a non-positive or non-finite duration.
pub fn mbps(bytes: u64, seconds: f64) -> Option<f64> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let rate = (bytes as f64 * 8.0) / (seconds * 1_000_000.0);
    rate.is_finite().then_some(rate)
}

/// A transfer-rate observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub node_id: String,
    pub region: String,
    /// Present for per-peer samples
    pub peer_id: Option<String>,
    /// Peer address, when the sample is tied to a single peer
    pub peer_address: Option<String>,
    pub direction: Direction,
    /// Point on the time axis: the later event for discrete samples, the bucket start for windows
    pub at: TraceTime,
    pub window: TimeWindow,
    pub total_bytes: u64,
    pub rate_mbps: f64,
}

/// One-way message delay between a send and its receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub node_id: String,
    pub peer_id: String,
    pub ip_address: String,
    /// Region of the peer address
    pub region: String,
    pub send_time: TraceTime,
    pub receive_time: TraceTime,
    /// Negative values are kept; they indicate clock skew between the two ends
    pub latency_ms: f64,
}

/// Whole-experiment summary for one node or one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    /// Node id or region label
    pub key: String,
    /// Region of the node (node rollups only)
    pub region: Option<String>,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub sent_events: usize,
    pub received_events: usize,
    pub first_seen: Option<TraceTime>,
    pub last_seen: Option<TraceTime>,
    pub total_time_sent_secs: Option<f64>,
    pub total_time_received_secs: Option<f64>,
    /// Undefined when the sent events span no time
    pub upload_mbps: Option<f64>,
    /// Undefined when the received events span no time
    pub download_mbps: Option<f64>,
}

/// Counters for every non-fatal skip path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounters {
    pub malformed_lines: usize,
    pub missing_fields: usize,
    pub invalid_timestamps: usize,
    pub degenerate_intervals: usize,
    pub unresolved_regions: usize,
    pub missing_files: usize,
    /// Byte totals clamped at `u64::MAX`
    pub saturated_totals: usize,
}

impl SkipCounters {
    pub fn total(&self) -> usize {
        self.malformed_lines
            + self.missing_fields
            + self.invalid_timestamps
            + self.degenerate_intervals
            + self.unresolved_regions
            + self.missing_files
            + self.saturated_totals
    }

    pub fn record_rejection(&mut self, rejection: RecordRejection) {
        match rejection {
            RecordRejection::MissingField(_) => self.missing_fields += 1,
            RecordRejection::InvalidTimestamp => self.invalid_timestamps += 1,
        }
    }
}

impl AddAssign for SkipCounters {
    fn add_assign(&mut self, other: Self) {
        self.malformed_lines += other.malformed_lines;
        self.missing_fields += other.missing_fields;
        self.invalid_timestamps += other.invalid_timestamps;
        self.degenerate_intervals += other.degenerate_intervals;
        self.unresolved_regions += other.unresolved_regions;
        self.missing_files += other.missing_files;
        self.saturated_totals += other.saturated_totals;
    }
}

/// Work that failed inside a worker and was set aside
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuarantinedWork {
    pub nodes: Vec<String>,
    pub reason: String,
}

/// Everything ingested from one experiment directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentData {
    pub nodes: Vec<Node>,
    pub sent: Vec<TransferEvent>,
    pub received: Vec<TransferEvent>,
    pub latency: Vec<LatencyRecord>,
    pub skips: SkipCounters,
    pub quarantined: Vec<QuarantinedWork>,
}

impl ExperimentData {
    pub fn events(&self, direction: Direction) -> &[TransferEvent] {
        match direction {
            Direction::Sent => &self.sent,
            Direction::Received => &self.received,
        }
    }

    pub fn events_mut(&mut self, direction: Direction) -> &mut Vec<TransferEvent> {
        match direction {
            Direction::Sent => &mut self.sent,
            Direction::Received => &mut self.received,
        }
    }

    /// Disjoint union of two partial results
    pub fn merge(&mut self, other: ExperimentData) {
        self.nodes.extend(other.nodes);
        self.sent.extend(other.sent);
        self.received.extend(other.received);
        self.latency.extend(other.latency);
        self.skips += other.skips;
        self.quarantined.extend(other.quarantined);
    }

    pub fn merged(mut self, other: ExperimentData) -> Self {
        self.merge(other);
        self
    }

    /// Put every collection in a fixed order so the result does not depend
    /// on how the node set was partitioned.
    pub fn canonicalize(&mut self) {
        self.nodes.sort();
        for events in [&mut self.sent, &mut self.received] {
            events.sort_by(|a, b| {
                (&a.node_id, a.timestamp, &a.peer_id, &a.ip_address, a.bytes).cmp(&(
                    &b.node_id,
                    b.timestamp,
                    &b.peer_id,
                    &b.ip_address,
                    b.bytes,
                ))
            });
        }
        self.latency.sort();
        self.quarantined.sort();
    }
}
