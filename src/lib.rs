//! # Tracestats - Throughput and latency metrics for network traces
//!
//! This library turns the per-node event logs collected during a
//! distributed-validator experiment into throughput and latency metrics,
//! aggregated per node and per geographic region.
//!
//! ## Overview
//!
//! An experiment directory holds one subdirectory per node:
//!
//! ```text
//! traces/
//!   10.0.0.1/
//!     timed_sent_bytes.jsonl
//!     timed_received_bytes.jsonl
//!     msg_latency.jsonl
//!   10.0.0.2/
//!     ...
//! ```
//!
//! Nodes are read in parallel, every event is tagged with its node and
//! region, and the merged collections feed the throughput, latency and
//! rollup stages.
//!
//! ## Architecture
//!
//! - `analysis`: ingestion, throughput, latency, rollups, resampling and reports
//! - `ip`: region table parsing and address to region resolution
//! - `config`: YAML configuration structures
//! - `config_loader`: configuration loading and CLI overrides
//! - `utils`: address helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tracestats::analysis::{run_pipeline, PipelineOptions};
//! use tracestats::ip::load_region_table;
//!
//! let regions = load_region_table(Path::new("list.txt"))?;
//! let report = run_pipeline(Path::new("traces"), &regions, &PipelineOptions::default())?;
//! println!("{} nodes", report.metadata.total_nodes);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Corrupt lines, missing files, incomplete records and zero-length
//! intervals are skipped and counted rather than treated as errors. A node
//! that cannot be read is quarantined and listed in the report. Everything
//! else returns `color_eyre::eyre::Result` with context.

pub mod analysis;
pub mod config;
pub mod config_loader;
pub mod ip;
pub mod utils;
