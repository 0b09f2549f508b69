//! Run configuration
//!
//! Paths, chunk size and booster parameters travel as one explicit value
//! instead of process-wide constants, so every component can be exercised
//! against a small synthetic manifest.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Train/validate/test ratios applied at cruise granularity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Fraction of cruises used for training
    pub train: f64,
    /// Fraction of cruises used for validation
    pub validate: f64,
    /// Fraction of cruises held out for testing
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            validate: 0.15,
            test: 0.15,
        }
    }
}

/// Configuration shared by every job of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root holding `<region>/<cruise>_part<index>.<ext>` shards
    pub data_root: PathBuf,
    /// Tab-separated inventory manifest
    pub manifest_path: PathBuf,
    /// Working directory for logs and runtime artifacts
    pub base_dir: PathBuf,
    /// Target record count per shard
    pub chunk_size: u64,
    /// Feature columns per record, label excluded
    pub feature_width: usize,
    /// Shard file extension
    #[serde(default = "default_extension")]
    pub shard_extension: String,
    /// Regions processed by the run
    #[serde(default)]
    pub regions: Vec<String>,
    /// Concurrent job limit
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seed for cruise shuffling; `None` draws from the OS
    #[serde(default)]
    pub seed: Option<u64>,
    /// Cruise-level split ratios
    #[serde(default)]
    pub split: SplitRatios,
    /// Number of cruise-level folds for custom cross validation
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Probability of keeping each cruise before cross validation
    #[serde(default)]
    pub cruise_sample_rate: Option<f64>,
    /// Opaque parameters handed to the training capability
    #[serde(default)]
    pub booster: serde_json::Value,
}

fn default_extension() -> String {
    "parquet".to_string()
}

const fn default_workers() -> usize {
    10
}

const fn default_folds() -> usize {
    10
}

impl Config {
    /// Minimal configuration with defaults for everything optional.
    #[must_use]
    pub fn new(
        data_root: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        chunk_size: u64,
        feature_width: usize,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            manifest_path: manifest_path.into(),
            base_dir: base_dir.into(),
            chunk_size,
            feature_width,
            shard_extension: default_extension(),
            regions: Vec::new(),
            workers: default_workers(),
            seed: None,
            split: SplitRatios::default(),
            folds: default_folds(),
            cruise_sample_rate: None,
            booster: serde_json::Value::Null,
        }
    }

    /// Load and validate a JSON configuration file.
    ///
    /// A leading `~` in `base_dir` is expanded from `$HOME`.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, not valid JSON, or fails
    /// [`Config::validate`].
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.base_dir = expand_home(&config.base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.feature_width == 0 {
            return Err(Error::Config("feature_width must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be positive".to_string()));
        }
        if self.folds == 0 {
            return Err(Error::Config("folds must be positive".to_string()));
        }
        if let Some(rate) = self.cruise_sample_rate {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(Error::Config(format!(
                    "cruise_sample_rate must be in (0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    std::env::var_os("HOME")
        .map_or_else(|| path.to_path_buf(), |home| PathBuf::from(home).join(rest))
}
