use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Analysis configuration that mirrors the YAML configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Directory holding one subdirectory of logs per node
    pub experiment_root: PathBuf,
    /// (Optional) Fixed-column region table mapping public IPv4 to region
    #[serde(default)]
    pub region_table: Option<PathBuf>,
    /// Where report.json and report.txt are written (default: "analysis_output")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Ingestion workers; 0 picks from the available cores
    #[serde(default)]
    pub workers: usize,
    /// Windowed throughput bucket width (default: 10s)
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
    /// Resampler bucket width (default: 1m)
    #[serde(default = "default_resample", with = "humantime_serde")]
    pub resample: Duration,
    /// Also compute windowed rates per (node, peer) (default: true)
    #[serde(default = "default_per_peer")]
    pub per_peer: bool,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid input configuration: {0}")]
    InvalidInput(String),
    #[error("Invalid window configuration: {0}")]
    InvalidWindow(String),
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("analysis_output")
}

fn default_window() -> Duration {
    Duration::from_secs(10)
}

fn default_resample() -> Duration {
    Duration::from_secs(60)
}

fn default_per_peer() -> bool {
    true
}

impl AnalysisConfig {
    /// Configuration for `experiment_root` with every other setting at its default
    pub fn for_root(experiment_root: impl Into<PathBuf>) -> Self {
        Self {
            experiment_root: experiment_root.into(),
            region_table: None,
            output_dir: default_output_dir(),
            workers: 0,
            window: default_window(),
            resample: default_resample(),
            per_peer: default_per_peer(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.experiment_root.as_os_str().is_empty() {
            return Err(ValidationError::InvalidInput(
                "experiment_root cannot be empty".to_string(),
            ));
        }

        if let Some(table) = &self.region_table {
            if table.as_os_str().is_empty() {
                return Err(ValidationError::InvalidInput(
                    "region_table cannot be an empty path".to_string(),
                ));
            }
        }

        // Widths below a microsecond truncate to zero buckets
        if self.window.as_micros() == 0 {
            return Err(ValidationError::InvalidWindow(
                "window must be at least 1us".to_string(),
            ));
        }
        if self.resample.as_micros() == 0 {
            return Err(ValidationError::InvalidWindow(
                "resample must be at least 1us".to_string(),
            ));
        }

        Ok(())
    }
}
