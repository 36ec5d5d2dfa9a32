use crate::error::Error;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the tensor containers to classify.
    pub scan_dir: PathBuf,
    /// Directory holding the four checkpoint tables.
    pub checkpoint_dir: PathBuf,
    pub extension: String,
    pub recursive: bool,
    pub ignore_patterns: Vec<String>,
    pub workers: usize,
    /// Worker flushes the scan tables every `flush_interval` completed files.
    pub flush_interval: usize,
    /// Capacity of the producer → worker queue, 0 for unbounded.
    pub queue_capacity: usize,
    pub parallel_refine: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan_dir: PathBuf::from("."),
            checkpoint_dir: PathBuf::from("."),
            extension: "safetensors".to_string(),
            recursive: false,
            ignore_patterns: Vec::new(),
            workers: 4,
            flush_interval: 2,
            queue_capacity: 8,
            parallel_refine: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Other("workers must be at least 1".to_string()));
        }
        if self.flush_interval == 0 {
            return Err(Error::Other(
                "flush_interval must be at least 1".to_string(),
            ));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(Error::Other("extension must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load `Config.toml` (or `path` when given) layered under `TENSOR_DUPER_*`
/// environment variables. Every field has a default, so an absent file is fine.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix("TENSOR_DUPER").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_pipeline() {
        let config = AppConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.flush_interval, 2);
        assert_eq!(config.extension, "safetensors");
        assert!(!config.recursive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "scan_dir = \"/data/loras\"\nworkers = 8\nignore_patterns = [\"**/tmp/**\"]\n",
        )
        .unwrap();

        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.scan_dir, PathBuf::from("/data/loras"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.ignore_patterns, vec!["**/tmp/**".to_string()]);
        assert_eq!(config.flush_interval, 2);
        assert_eq!(config.checkpoint_dir, PathBuf::from("."));
    }

    #[test]
    fn test_validate_rejects_zero_workers_and_interval() {
        let config = AppConfig {
            workers: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            flush_interval: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
