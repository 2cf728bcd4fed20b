//! Throughput and latency analysis CLI for distributed-validator traces.
//!
//! Reads per-node event logs from an experiment directory and writes
//! node and region metrics as JSON and text reports.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::info;

use tracestats::analysis::ingest::worker_count;
use tracestats::analysis::{self, PipelineOptions};
use tracestats::config::AnalysisConfig;
use tracestats::config_loader::{resolve_config, AnalysisOverrides};
use tracestats::ip::{load_region_table, parse_region_table, NoRegions, RegionResolver};

#[derive(Parser, Debug)]
#[command(name = "tracestats")]
#[command(about = "Throughput and latency metrics from distributed-validator network traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an analysis configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Experiment directory with one subdirectory per node
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Region table mapping public IPv4 addresses to regions
    #[arg(long)]
    regions: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of ingestion workers (0 = auto-detect)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the full analysis and write report.json and report.txt
    Full,

    /// Run the analysis and print the summary only
    Summary,

    /// Check a region table and list the lines it rejects
    Regions {
        /// Region table to check
        path: PathBuf,
    },
}

impl Cli {
    fn overrides(&self) -> AnalysisOverrides {
        AnalysisOverrides {
            experiment_root: self.root.clone(),
            region_table: self.regions.clone(),
            output_dir: self.output.clone(),
            workers: self.workers,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    if let Commands::Regions { path } = &cli.command {
        return check_region_table(path);
    }

    let config = resolve_config(cli.config.as_deref(), &cli.overrides())?;

    // Later stages share the global pool, under the same bound as ingestion
    rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size(&config))
        .build_global()
        .context("Failed to configure thread pool")?;

    let report = run(&config)?;

    if cli.command == Commands::Full {
        write_reports(&report, &config.output_dir)?;
    }
    analysis::print_summary(&report);

    Ok(())
}

fn pool_size(config: &AnalysisConfig) -> usize {
    worker_count(config.workers)
}

fn load_resolver(config: &AnalysisConfig) -> Result<Box<dyn RegionResolver>> {
    match &config.region_table {
        Some(path) => Ok(Box::new(load_region_table(path)?)),
        None => {
            info!("No region table given; every region will be Unknown");
            Ok(Box::new(NoRegions))
        }
    }
}

fn run(config: &AnalysisConfig) -> Result<analysis::ExperimentReport> {
    let resolver = load_resolver(config)?;
    let options = PipelineOptions::from(config);

    info!("Analyzing {}...", config.experiment_root.display());
    analysis::run_pipeline(&config.experiment_root, resolver.as_ref(), &options)
}

fn write_reports(report: &analysis::ExperimentReport, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    analysis::generate_json_report(report, &output_dir.join("report.json"))?;
    analysis::generate_text_report(report, &output_dir.join("report.txt"))?;
    Ok(())
}

fn check_region_table(path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read region table: {}", path.display()))?;
    let parse = parse_region_table(&content);

    println!("{} rows parsed, {} lines rejected", parse.rows.len(), parse.rejected.len());
    for rejection in &parse.rejected {
        println!("  {}", rejection);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["tracestats", "--root", "traces", "-j", "4", "full"]);

        assert_eq!(cli.command, Commands::Full);
        assert_eq!(cli.root, Some(PathBuf::from("traces")));
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.overrides().workers, Some(4));
    }

    #[test]
    fn test_regions_args() {
        let cli = Cli::parse_from(["tracestats", "regions", "list.txt"]);
        assert_eq!(
            cli.command,
            Commands::Regions {
                path: PathBuf::from("list.txt")
            }
        );
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_pool_size_keeps_core_headroom() {
        let mut config = AnalysisConfig::for_root(PathBuf::from("traces"));
        config.workers = 0;
        assert_eq!(pool_size(&config), worker_count(0));

        config.workers = 1;
        assert_eq!(pool_size(&config), 1);

        config.workers = 10_000;
        assert_eq!(pool_size(&config), worker_count(0));
    }

    #[test]
    fn test_check_region_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(&path, "ID Name\nnot a row\n").unwrap();

        assert!(check_region_table(&path).is_ok());
        assert!(check_region_table(&dir.path().join("missing.txt")).is_err());
    }
}
