use crate::config::AnalysisConfig;
use color_eyre::eyre::{Context, Result};
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<AnalysisConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file: {}", config_path.display()))?;

    let config: AnalysisConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// CLI arguments that can override YAML settings
#[derive(Debug, Clone, Default)]
pub struct AnalysisOverrides {
    pub experiment_root: Option<PathBuf>,
    pub region_table: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

/// Apply CLI overrides to a configuration
pub fn apply_overrides(config: &mut AnalysisConfig, overrides: &AnalysisOverrides) -> Result<()> {
    if let Some(root) = &overrides.experiment_root {
        info!("Overriding experiment root with {}", root.display());
        config.experiment_root = root.clone();
    }

    if let Some(table) = &overrides.region_table {
        config.region_table = Some(table.clone());
    }

    if let Some(output) = &overrides.output_dir {
        config.output_dir = output.clone();
    }

    if let Some(workers) = overrides.workers {
        config.workers = workers;
    }

    // Re-validate after applying overrides
    config.validate()?;

    Ok(())
}

/// Build the configuration from an optional file plus CLI overrides.
///
/// Without a file the experiment root must come from the overrides.
pub fn resolve_config(config_path: Option<&Path>, overrides: &AnalysisOverrides) -> Result<AnalysisConfig> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::for_root(overrides.experiment_root.clone().unwrap_or_default()),
    };

    apply_overrides(&mut config, overrides)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "experiment_root: traces\nwindow: 5s\nworkers: 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.experiment_root, PathBuf::from("traces"));
        assert_eq!(config.window.as_secs(), 5);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "experiment_root: traces\nresample: 0s").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "window: [not, a, duration]").unwrap();
        assert!(load_config(file.path()).is_err());

        assert!(load_config(Path::new("/nonexistent/tracestats.yaml")).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "experiment_root: traces\nworkers: 2\nregion_table: a.txt").unwrap();

        let overrides = AnalysisOverrides {
            experiment_root: Some(PathBuf::from("other")),
            workers: Some(8),
            ..Default::default()
        };
        let config = resolve_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.experiment_root, PathBuf::from("other"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.region_table, Some(PathBuf::from("a.txt")));
    }

    #[test]
    fn test_root_required_without_file() {
        assert!(resolve_config(None, &AnalysisOverrides::default()).is_err());

        let overrides = AnalysisOverrides {
            experiment_root: Some(PathBuf::from("traces")),
            ..Default::default()
        };
        let config = resolve_config(None, &overrides).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("analysis_output"));
    }
}
