//! Ingestion of a whole experiment directory.
//!
//! The experiment root holds one directory per node. The node set is split
//! into contiguous partitions and each partition is read by one worker on a
//! bounded rayon pool. Workers share nothing but the read-only resolver.
//!
//! Merge contract: partial results are combined with [`ExperimentData::merge`],
//! which concatenates collections and sums skip counters. Both are
//! associative and, after [`ExperimentData::canonicalize`], commutative, so
//! the outcome is identical for any partitioning of the node set.
//!
//! A worker that fails on a node quarantines that node and carries on. A
//! worker that panics quarantines its whole partition. Neither aborts the run.

use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use rayon::prelude::*;

use super::log_parser::read_jsonl_file;
use super::types::*;
use crate::ip::RegionResolver;

/// Cores kept free for the orchestrating thread
pub const RESERVED_CORES: usize = 1;

/// Failure while ingesting one node or one partition
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read {} for node {node_id}: {source}", .path.display())]
    Read {
        node_id: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker panicked while ingesting {nodes} node(s): {message}")]
    WorkerPanic { nodes: usize, message: String },
}

/// List node directories under the experiment root, sorted by name.
///
/// Every subdirectory counts as a node; plain files are ignored.
pub fn discover_nodes(root: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("Failed to read experiment directory: {}", root.display()))?;

    let mut nodes = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("Failed to list experiment directory: {}", root.display()))?;
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            nodes.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    nodes.sort();
    Ok(nodes)
}

/// Number of workers to use for a requested count (0 = auto).
///
/// Bounded by the available cores minus [`RESERVED_CORES`], and at least 1.
pub fn worker_count(requested: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let bound = available.saturating_sub(RESERVED_CORES).max(1);

    if requested == 0 {
        bound
    } else {
        requested.min(bound)
    }
}

/// Split `nodes` into at most `chunks` contiguous, roughly equal partitions.
///
/// Sizes differ by at most one and every node lands in exactly one partition.
pub fn partition_nodes(nodes: &[String], chunks: usize) -> Vec<Vec<String>> {
    if nodes.is_empty() {
        return Vec::new();
    }

    let chunks = chunks.clamp(1, nodes.len());
    let base = nodes.len() / chunks;
    let extra = nodes.len() % chunks;

    let mut partitions = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let len = base + usize::from(i < extra);
        partitions.push(nodes[start..start + len].to_vec());
        start += len;
    }

    partitions
}

/// Read and tag every log of one node
pub fn ingest_node<R: RegionResolver + ?Sized>(
    root: &Path,
    node_id: &str,
    resolver: &R,
) -> Result<ExperimentData, IngestError> {
    let node_dir = root.join(node_id);
    let mut data = ExperimentData::default();

    let region = match resolver.lookup(node_id) {
        Some(region) => region,
        None => {
            data.skips.unresolved_regions += 1;
            UNKNOWN_REGION.to_string()
        }
    };
    let node = Node {
        node_id: node_id.to_string(),
        region,
    };

    for direction in Direction::ALL {
        let path = node_dir.join(direction.file_name());
        let contents = read_jsonl_file::<RawTransferLine>(&path).map_err(|source| IngestError::Read {
            node_id: node_id.to_string(),
            path: path.clone(),
            source,
        })?;

        if contents.missing {
            data.skips.missing_files += 1;
        }
        data.skips.malformed_lines += contents.malformed_lines;

        let events = data.events_mut(direction);
        let mut rejected = SkipCounters::default();
        for raw in contents.records {
            match TransferEvent::from_raw(raw, &node, direction) {
                Ok(event) => events.push(event),
                Err(rejection) => rejected.record_rejection(rejection),
            }
        }
        data.skips += rejected;
    }

    let path = node_dir.join(LATENCY_FILE);
    let contents = read_jsonl_file::<RawLatencyLine>(&path).map_err(|source| IngestError::Read {
        node_id: node_id.to_string(),
        path: path.clone(),
        source,
    })?;
    if contents.missing {
        data.skips.missing_files += 1;
    }
    data.skips.malformed_lines += contents.malformed_lines;
    data.latency.extend(
        contents
            .records
            .into_iter()
            .map(|raw| LatencyRecord::tagged(raw, &node)),
    );

    log::debug!(
        "Ingested {} ({}): {} sent, {} received, {} latency records",
        node.node_id,
        node.region,
        data.sent.len(),
        data.received.len(),
        data.latency.len()
    );

    data.nodes.push(node);
    Ok(data)
}

/// One worker's pass over its partition, with per-node quarantine
fn run_worker<R: RegionResolver + ?Sized>(root: &Path, partition: &[String], resolver: &R) -> ExperimentData {
    let mut output = ExperimentData::default();

    for node_id in partition {
        match ingest_node(root, node_id, resolver) {
            Ok(data) => output.merge(data),
            Err(e) => {
                log::warn!("Quarantined node {}: {}", node_id, e);
                output.quarantined.push(QuarantinedWork {
                    nodes: vec![node_id.clone()],
                    reason: e.to_string(),
                });
            }
        }
    }

    output
}

/// Run a worker, turning a panic into a quarantined partition
fn run_worker_guarded<R: RegionResolver + ?Sized>(
    root: &Path,
    partition: &[String],
    resolver: &R,
) -> ExperimentData {
    match panic::catch_unwind(AssertUnwindSafe(|| run_worker(root, partition, resolver))) {
        Ok(output) => output,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let error = IngestError::WorkerPanic {
                nodes: partition.len(),
                message,
            };
            log::warn!("Quarantined partition of {} node(s): {}", partition.len(), error);

            ExperimentData {
                quarantined: vec![QuarantinedWork {
                    nodes: partition.to_vec(),
                    reason: error.to_string(),
                }],
                ..Default::default()
            }
        }
    }
}

/// Ingest the given partitions on a pool of `threads` workers and merge the results.
pub fn ingest_partitions<R: RegionResolver + ?Sized>(
    root: &Path,
    partitions: &[Vec<String>],
    resolver: &R,
    threads: usize,
) -> Result<ExperimentData> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .context("Failed to build ingestion thread pool")?;

    let mut data = pool.install(|| {
        partitions
            .par_iter()
            .map(|partition| run_worker_guarded(root, partition, resolver))
            .reduce(ExperimentData::default, ExperimentData::merged)
    });

    data.canonicalize();
    Ok(data)
}

/// Discover, partition and ingest a whole experiment.
///
/// `requested_workers` of 0 picks the worker count from the available cores.
pub fn ingest_experiment<R: RegionResolver + ?Sized>(
    root: &Path,
    resolver: &R,
    requested_workers: usize,
) -> Result<ExperimentData> {
    let nodes = discover_nodes(root)?;
    let workers = worker_count(requested_workers);
    let partitions = partition_nodes(&nodes, workers);

    log::info!(
        "Ingesting {} nodes from {} with {} workers...",
        nodes.len(),
        root.display(),
        workers
    );

    let data = ingest_partitions(root, &partitions, resolver, workers)?;

    log::info!(
        "Ingested {} nodes: {} sent, {} received, {} latency records",
        data.nodes.len(),
        data.sent.len(),
        data.received.len(),
        data.latency.len()
    );
    if data.skips.total() > 0 {
        log::info!("Skipped during ingestion: {:?}", data.skips);
    }
    if !data.quarantined.is_empty() {
        log::warn!("{} work item(s) quarantined", data.quarantined.len());
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::NoRegions;
    use std::collections::HashMap;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{:02}", i)).collect()
    }

    fn write_node(root: &Path, node: &str, sent: &[&str], received: &[&str]) {
        let dir = root.join(node);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(Direction::Sent.file_name()), sent.join("\n")).unwrap();
        fs::write(dir.join(Direction::Received.file_name()), received.join("\n")).unwrap();
    }

    fn line(time: &str, bytes: u64, peer: &str) -> String {
        format!(
            r#"{{"msg":{{"time":"{}","bytes":{},"peer_id":"{}","ip_address":"10.0.0.9:26656"}}}}"#,
            time, bytes, peer
        )
    }

    #[test]
    fn test_partition_nodes_is_disjoint_and_balanced() {
        let all = nodes(10);
        let partitions = partition_nodes(&all, 3);
        assert_eq!(partitions.len(), 3);
        assert_eq!(
            partitions.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![4, 3, 3]
        );
        assert_eq!(partitions.concat(), all);
    }

    #[test]
    fn test_partition_nodes_edge_cases() {
        assert!(partition_nodes(&[], 4).is_empty());
        assert_eq!(partition_nodes(&nodes(2), 8).len(), 2);
        assert_eq!(partition_nodes(&nodes(5), 0).len(), 1);
    }

    #[test]
    fn test_worker_count_bounds() {
        let auto = worker_count(0);
        assert!(auto >= 1);
        assert_eq!(worker_count(1), 1);
        assert!(worker_count(10_000) <= auto);
    }

    #[test]
    fn test_discover_nodes_ignores_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("list.txt"), "x").unwrap();

        assert_eq!(discover_nodes(dir.path()).unwrap(), vec!["a", "b"]);
        assert!(discover_nodes(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_ingest_node_tags_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let sent = [
            line("2024-01-01T00:00:00Z", 100, "p1"),
            "{broken".to_string(),
            r#"{"msg":{"bytes":5}}"#.to_string(),
            line("not-a-time", 1, "p1"),
        ];
        let sent: Vec<&str> = sent.iter().map(String::as_str).collect();
        write_node(dir.path(), "10.0.0.1", &sent, &[]);

        let mut regions = HashMap::new();
        regions.insert("10.0.0.1".to_string(), "fra1".to_string());

        let data = ingest_node(dir.path(), "10.0.0.1", &regions).unwrap();
        assert_eq!(data.sent.len(), 1);
        assert_eq!(data.sent[0].region, "fra1");
        assert_eq!(data.sent[0].node_id, "10.0.0.1");
        assert_eq!(data.skips.malformed_lines, 1);
        assert_eq!(data.skips.missing_fields, 1);
        assert_eq!(data.skips.invalid_timestamps, 1);
        // No latency file was written
        assert_eq!(data.skips.missing_files, 1);
        assert_eq!(data.skips.unresolved_regions, 0);
    }

    #[test]
    fn test_unresolved_region_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("n1")).unwrap();

        let data = ingest_node(dir.path(), "n1", &NoRegions).unwrap();
        assert_eq!(data.nodes[0].region, UNKNOWN_REGION);
        assert_eq!(data.skips.unresolved_regions, 1);
        assert_eq!(data.skips.missing_files, 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_node_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let sent = line("2024-01-01T00:00:00Z", 10, "p");
        write_node(dir.path(), "good", &[sent.as_str()], &[]);
        // A directory where a log file is expected cannot be read as a file
        fs::create_dir_all(dir.path().join("bad").join(Direction::Sent.file_name())).unwrap();

        let partitions = partition_nodes(&["bad".to_string(), "good".to_string()], 1);
        let data = ingest_partitions(dir.path(), &partitions, &NoRegions, 1).unwrap();

        assert_eq!(data.sent.len(), 1);
        assert_eq!(data.quarantined.len(), 1);
        assert_eq!(data.quarantined[0].nodes, vec!["bad".to_string()]);
    }

    #[test]
    fn test_panicking_worker_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let sent = line("2024-01-01T00:00:00Z", 10, "p");
        write_node(dir.path(), "a", &[sent.as_str()], &[]);
        write_node(dir.path(), "b", &[sent.as_str()], &[]);

        let resolver = crate::ip::FnResolver(|address: &str| -> Option<String> {
            if address == "b" {
                panic!("resolver exploded");
            }
            None
        });

        let partitions = vec![vec!["a".to_string()], vec!["b".to_string()]];
        let data = ingest_partitions(dir.path(), &partitions, &resolver, 2).unwrap();

        assert_eq!(data.sent.len(), 1);
        assert_eq!(data.sent[0].node_id, "a");
        assert_eq!(data.quarantined.len(), 1);
        assert!(data.quarantined[0].reason.contains("resolver exploded"));
    }

    #[test]
    fn test_merge_is_partition_independent() {
        let dir = tempfile::tempdir().unwrap();
        let all = nodes(7);
        for (i, node) in all.iter().enumerate() {
            let lines: Vec<String> = (0..=i)
                .map(|j| line(&format!("2024-01-01T00:00:{:02}Z", j), (i * 10 + j) as u64, "p"))
                .collect();
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            write_node(dir.path(), node, &lines, &lines);
        }

        let single = ingest_partitions(dir.path(), &partition_nodes(&all, 1), &NoRegions, 1).unwrap();
        for chunks in 2..=7 {
            let split = ingest_partitions(dir.path(), &partition_nodes(&all, chunks), &NoRegions, 3).unwrap();
            assert_eq!(split, single, "chunks = {}", chunks);
        }
        assert_eq!(single.sent.len(), 28);
        assert_eq!(single.received.len(), 28);
    }
}
