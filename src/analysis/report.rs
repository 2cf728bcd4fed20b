//! Report generation for trace analysis.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::latency::PeerLatency;
use super::rollup::MeanRates;
use super::throughput::RegionPairSample;
use super::time_window::{ResampledPoint, SeriesStats};
use super::types::*;

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_timestamp: String,
    pub experiment_root: String,
    pub total_nodes: usize,
    pub sent_events: usize,
    pub received_events: usize,
    pub latency_records: usize,
    pub window_secs: f64,
    pub resample_secs: f64,
}

/// Sample-mode rates resampled per direction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionSeries {
    pub sent: Vec<ResampledPoint>,
    pub received: Vec<ResampledPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThroughputReport {
    /// Sample-mode rates, one per consecutive event pair
    pub samples: Vec<ThroughputSample>,
    /// Windowed rates per node
    pub windowed: Vec<ThroughputSample>,
    /// Windowed rates per (node, peer); empty unless requested
    pub per_peer_windowed: Vec<ThroughputSample>,
    pub region_pairs: Vec<RegionPairSample>,
    pub resampled: DirectionSeries,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencySection {
    pub samples: Vec<LatencySample>,
    pub by_peer: Vec<PeerLatency>,
    pub stats: SeriesStats,
    pub resampled: Vec<ResampledPoint>,
}

/// Complete analysis report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub metadata: AnalysisMetadata,
    pub skips: SkipCounters,
    pub quarantined: Vec<QuarantinedWork>,
    pub node_rollups: Vec<Rollup>,
    pub region_rollups: Vec<Rollup>,
    pub node_means: MeanRates,
    pub region_means: MeanRates,
    pub throughput: ThroughputReport,
    pub latency: LatencySection,
}

fn rate(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn rollup_table(lines: &mut Vec<String>, title: &str, rollups: &[Rollup]) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!(
        "{:<24} {:>14} {:>14} {:>12} {:>12}",
        "Key", "Bytes Sent", "Bytes Recv", "Up Mbps", "Down Mbps"
    ));
    lines.push("-".repeat(80));
    for r in rollups {
        lines.push(format!(
            "{:<24} {:>14} {:>14} {:>12} {:>12}",
            r.key,
            r.total_bytes_sent,
            r.total_bytes_received,
            rate(r.upload_mbps),
            rate(r.download_mbps)
        ));
    }
    lines.push(String::new());
}

fn means_lines(lines: &mut Vec<String>, label: &str, means: &MeanRates) {
    lines.push(format!(
        "  {} mean upload:   {} Mbps over {} entities",
        label,
        rate(means.upload_mbps),
        means.upload_entities
    ));
    lines.push(format!(
        "  {} mean download: {} Mbps over {} entities",
        label,
        rate(means.download_mbps),
        means.download_entities
    ));
}

/// Generate JSON report
pub fn generate_json_report(report: &ExperimentReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Render the human-readable text report
pub fn render_text_report(report: &ExperimentReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    // Header
    lines.push("=".repeat(80));
    lines.push("                   TRACE THROUGHPUT AND LATENCY ANALYSIS".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    // Metadata
    let meta = &report.metadata;
    lines.push(format!("Analysis Date: {}", meta.analysis_timestamp));
    lines.push(format!("Experiment Directory: {}", meta.experiment_root));
    lines.push(format!("Nodes Analyzed: {}", meta.total_nodes));
    lines.push(format!("Sent Events: {}", meta.sent_events));
    lines.push(format!("Received Events: {}", meta.received_events));
    lines.push(format!("Latency Records: {}", meta.latency_records));
    lines.push(format!("Window: {}s, Resample: {}s", meta.window_secs, meta.resample_secs));
    lines.push(String::new());

    let skips = &report.skips;
    lines.push(format!("Skipped: {} total", skips.total()));
    lines.push(format!("  Malformed lines:       {}", skips.malformed_lines));
    lines.push(format!("  Missing fields:        {}", skips.missing_fields));
    lines.push(format!("  Invalid timestamps:    {}", skips.invalid_timestamps));
    lines.push(format!("  Degenerate intervals:  {}", skips.degenerate_intervals));
    lines.push(format!("  Unresolved regions:    {}", skips.unresolved_regions));
    lines.push(format!("  Missing files:         {}", skips.missing_files));
    lines.push(format!("  Saturated totals:      {}", skips.saturated_totals));
    lines.push(String::new());

    if !report.quarantined.is_empty() {
        lines.push("Quarantined:".to_string());
        for q in &report.quarantined {
            lines.push(format!("  {}: {}", q.nodes.join(", "), q.reason));
        }
        lines.push(String::new());
    }

    rollup_table(&mut lines, "NODE ROLLUPS", &report.node_rollups);
    rollup_table(&mut lines, "REGION ROLLUPS", &report.region_rollups);

    lines.push("Mean Rates (unweighted):".to_string());
    means_lines(&mut lines, "Node", &report.node_means);
    means_lines(&mut lines, "Region", &report.region_means);
    lines.push(String::new());

    // Throughput
    let throughput = &report.throughput;
    lines.push("=".repeat(80));
    lines.push("                              THROUGHPUT".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());
    lines.push(format!("Sample-mode rates: {}", throughput.samples.len()));
    lines.push(format!("Windowed rates (per node): {}", throughput.windowed.len()));
    lines.push(format!("Windowed rates (per peer): {}", throughput.per_peer_windowed.len()));
    lines.push(format!("Region-pair samples: {}", throughput.region_pairs.len()));
    lines.push(format!(
        "Resampled buckets: {} sent, {} received",
        throughput.resampled.sent.len(),
        throughput.resampled.received.len()
    ));
    lines.push(String::new());

    // Latency
    let latency = &report.latency;
    lines.push("=".repeat(80));
    lines.push("                               LATENCY".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());
    lines.push(format!("Samples: {}", latency.stats.count));
    if let (Some(mean), Some(min), Some(max)) = (latency.stats.mean, latency.stats.min, latency.stats.max) {
        lines.push(format!("  Mean: {:.3}ms", mean));
        if let Some(std) = latency.stats.std {
            lines.push(format!("  Std dev: {:.3}ms", std));
        }
        lines.push(format!("  Min: {:.3}ms, Max: {:.3}ms", min, max));
    }
    lines.push(String::new());

    if !latency.by_peer.is_empty() {
        lines.push("Fastest Peers:".to_string());
        let mut fastest: Vec<&PeerLatency> = latency.by_peer.iter().collect();
        fastest.sort_by(|a, b| a.mean_latency_ms.total_cmp(&b.mean_latency_ms));
        for (i, peer) in fastest.iter().take(5).enumerate() {
            lines.push(format!(
                "  {}. {} -> {} ({}): {:.3}ms over {} samples",
                i + 1,
                peer.node_id,
                peer.ip_address,
                peer.region,
                peer.mean_latency_ms,
                peer.samples
            ));
        }
        lines.push(String::new());
    }

    // Footer
    lines.push("=".repeat(80));

    lines.join("\n")
}

/// Generate human-readable text report
pub fn generate_text_report(report: &ExperimentReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_text_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &ExperimentReport) {
    println!("\n=== TRACE ANALYSIS SUMMARY ===\n");
    println!("Nodes: {}", report.metadata.total_nodes);
    println!("Sent events: {}", report.metadata.sent_events);
    println!("Received events: {}", report.metadata.received_events);
    println!("Skipped: {}", report.skips.total());
    if !report.quarantined.is_empty() {
        println!("Quarantined work items: {}", report.quarantined.len());
    }

    println!("\nThroughput:");
    println!("  Mean node upload: {} Mbps", rate(report.node_means.upload_mbps));
    println!("  Mean node download: {} Mbps", rate(report.node_means.download_mbps));
    println!("  Regions: {}", report.region_rollups.len());

    if let Some(mean) = report.latency.stats.mean {
        println!("\nLatency:");
        println!("  Samples: {}", report.latency.stats.count);
        println!("  Mean: {:.3}ms", mean);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ExperimentReport {
        ExperimentReport {
            metadata: AnalysisMetadata {
                analysis_timestamp: "2024-01-01T00:00:00+00:00".to_string(),
                experiment_root: "traces".to_string(),
                total_nodes: 1,
                sent_events: 2,
                received_events: 0,
                latency_records: 0,
                window_secs: 10.0,
                resample_secs: 60.0,
            },
            skips: SkipCounters {
                malformed_lines: 3,
                ..Default::default()
            },
            quarantined: vec![QuarantinedWork {
                nodes: vec!["bad".to_string()],
                reason: "unreadable".to_string(),
            }],
            node_rollups: vec![Rollup {
                key: "A".to_string(),
                region: Some("R1".to_string()),
                total_bytes_sent: 2000,
                total_bytes_received: 0,
                sent_events: 2,
                received_events: 0,
                first_seen: None,
                last_seen: None,
                total_time_sent_secs: Some(1.0),
                total_time_received_secs: None,
                upload_mbps: Some(0.016),
                download_mbps: None,
            }],
            region_rollups: Vec::new(),
            node_means: MeanRates::default(),
            region_means: MeanRates::default(),
            throughput: ThroughputReport::default(),
            latency: LatencySection::default(),
        }
    }

    #[test]
    fn test_text_report_contents() {
        let text = render_text_report(&report());
        assert!(text.contains("Nodes Analyzed: 1"));
        assert!(text.contains("Malformed lines:       3"));
        assert!(text.contains("bad: unreadable"));
        assert!(text.contains("0.0160"));
        assert!(text.contains("n/a"));
    }

    #[test]
    fn test_reports_written() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("report.json");
        let text_path = dir.path().join("report.txt");

        generate_json_report(&report(), &json_path).unwrap();
        generate_text_report(&report(), &text_path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["node_rollups"][0]["total_bytes_sent"], 2000);
        assert_eq!(json["skips"]["malformed_lines"], 3);
        assert!(fs::read_to_string(&text_path).unwrap().starts_with(&"=".repeat(80)));
    }
}
