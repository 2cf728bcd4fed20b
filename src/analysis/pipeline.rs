//! The analysis pipeline: discover, read and tag, then throughput and
//! latency, then rollups and resampling.

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::Result;

use super::ingest::ingest_experiment;
use super::latency::{compute_latencies, mean_latency_by_peer};
use super::report::{AnalysisMetadata, DirectionSeries, ExperimentReport, LatencySection, ThroughputReport};
use super::rollup::{degenerate_rollups, mean_rates, rollup_by_node, rollup_by_region, saturated_rollups};
use super::throughput::{label_region_pairs, sample_rates, saturated_windows, windowed_rates, DEFAULT_WINDOW};
use super::time_window::{calculate_stats, resample, resample_grouped, DEFAULT_RESAMPLE};
use super::types::*;
use crate::config::AnalysisConfig;
use crate::ip::RegionResolver;

/// Knobs for one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Ingestion workers; 0 picks from the available cores
    pub workers: usize,
    /// Windowed throughput bucket width
    pub window: Duration,
    /// Resampler bucket width
    pub resample: Duration,
    /// Also compute windowed rates per (node, peer)
    pub per_peer: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            window: DEFAULT_WINDOW,
            resample: DEFAULT_RESAMPLE,
            per_peer: true,
        }
    }
}

impl From<&AnalysisConfig> for PipelineOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            workers: config.workers,
            window: config.window,
            resample: config.resample,
            per_peer: config.per_peer,
        }
    }
}

/// Run every stage after ingestion over already-ingested data
pub fn analyze<R: RegionResolver + ?Sized>(
    root: &Path,
    data: &ExperimentData,
    resolver: &R,
    options: &PipelineOptions,
) -> ExperimentReport {
    let mut skips = data.skips;

    // Throughput
    let mut samples = Vec::new();
    let mut windowed = Vec::new();
    let mut per_peer_windowed = Vec::new();
    for direction in Direction::ALL {
        let events = data.events(direction);
        let rates = sample_rates(events);
        skips.degenerate_intervals += rates.degenerate_intervals;
        samples.extend(rates.samples);

        windowed.extend(windowed_rates(events, options.window, false));
        if options.per_peer {
            per_peer_windowed.extend(windowed_rates(events, options.window, true));
        }
    }
    skips.saturated_totals += saturated_windows(&windowed) + saturated_windows(&per_peer_windowed);
    let region_pairs = label_region_pairs(&samples, resolver);

    let mut by_direction = resample_grouped(
        samples.iter().map(|s| (s.direction, s.at, s.rate_mbps)),
        options.resample,
    );
    let resampled = DirectionSeries {
        sent: by_direction.remove(&Direction::Sent).unwrap_or_default(),
        received: by_direction.remove(&Direction::Received).unwrap_or_default(),
    };

    log::info!(
        "Throughput: {} samples, {} windows, {} per-peer windows, {} region-pair samples",
        samples.len(),
        windowed.len(),
        per_peer_windowed.len(),
        region_pairs.len()
    );

    // Latency
    let latency = compute_latencies(&data.latency, resolver);
    skips += latency.skips();
    let latencies: Vec<Option<f64>> = latency.samples.iter().map(|s| Some(s.latency_ms)).collect();
    let latency_section = LatencySection {
        by_peer: mean_latency_by_peer(&latency.samples),
        stats: calculate_stats(&latencies),
        resampled: resample(
            latency.samples.iter().map(|s| (s.send_time, s.latency_ms)),
            options.resample,
        ),
        samples: latency.samples,
    };

    log::info!(
        "Latency: {} samples from {} records",
        latency_section.samples.len(),
        data.latency.len()
    );

    // Rollups
    let node_rollups = rollup_by_node(&data.sent, &data.received);
    let region_rollups = rollup_by_region(&data.sent, &data.received);
    skips.degenerate_intervals += degenerate_rollups(&node_rollups);
    skips.saturated_totals += saturated_rollups(&node_rollups) + saturated_rollups(&region_rollups);

    log::info!(
        "Rolled up {} nodes into {} regions",
        node_rollups.len(),
        region_rollups.len()
    );
    if skips.total() > 0 {
        log::info!("Skipped overall: {:?}", skips);
    }

    ExperimentReport {
        metadata: AnalysisMetadata {
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            experiment_root: root.display().to_string(),
            total_nodes: data.nodes.len(),
            sent_events: data.sent.len(),
            received_events: data.received.len(),
            latency_records: data.latency.len(),
            window_secs: options.window.as_secs_f64(),
            resample_secs: options.resample.as_secs_f64(),
        },
        skips,
        quarantined: data.quarantined.clone(),
        node_means: mean_rates(&node_rollups),
        region_means: mean_rates(&region_rollups),
        node_rollups,
        region_rollups,
        throughput: ThroughputReport {
            samples,
            windowed,
            per_peer_windowed,
            region_pairs,
            resampled,
        },
        latency: latency_section,
    }
}

/// Ingest an experiment directory and analyze it
pub fn run_pipeline<R: RegionResolver + ?Sized>(
    root: &Path,
    resolver: &R,
    options: &PipelineOptions,
) -> Result<ExperimentReport> {
    let data = ingest_experiment(root, resolver, options.workers)?;
    Ok(analyze(root, &data, resolver, options))
}
