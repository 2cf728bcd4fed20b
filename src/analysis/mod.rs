//! Throughput and latency analysis for distributed-validator network traces.
//!
//! This module ingests per-node event logs, derives transfer rates and
//! message latencies, and rolls them up per node and per region.

pub mod types;
pub mod timestamp;
pub mod log_parser;
pub mod ingest;
pub mod throughput;
pub mod latency;
pub mod rollup;
pub mod time_window;
pub mod report;
pub mod pipeline;

pub use types::*;
pub use ingest::ingest_experiment;
pub use pipeline::{analyze, run_pipeline, PipelineOptions};
pub use report::{generate_json_report, generate_text_report, print_summary, ExperimentReport};
