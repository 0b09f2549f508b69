//! Error types for bathyshard
//!
//! Manifest and configuration errors stop a job outright. Shard read
//! mismatches are reported to the caller and logged, never raised by the
//! dense loader itself.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bathyshard error types
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest could not be opened or read
    #[error("Cannot read manifest {}: {source}", path.display())]
    ManifestIo {
        /// Manifest path
        path: PathBuf,
        /// Underlying IO failure
        source: std::io::Error,
    },

    /// Manifest row does not hold the five expected fields
    #[error(
        "Malformed manifest row {line}: {reason}\n\
         Expected: region<TAB>cruise<TAB>total<TAB>bad<TAB>shard_count"
    )]
    ManifestFormat {
        /// 1-based line number
        line: usize,
        /// What was wrong with the row
        reason: String,
    },

    /// Shard arithmetic disagrees with the manifest (corrupted inventory)
    #[error(
        "Inventory inconsistency for {region}/{cruise}: \
         manifest total {expected}, shards cover {assigned}"
    )]
    InventoryInconsistency {
        /// Region key
        region: String,
        /// Cruise name
        cruise: String,
        /// Manifest-declared record total
        expected: u64,
        /// Sum of the synthesized shard counts (`u64::MAX` on overflow)
        assigned: u64,
    },

    /// Region not present in the inventory
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// Split ratios must sum to exactly 1.0
    #[error(
        "Invalid split ratios: train={train} validate={validate} test={test} \
         (must sum to 1.0)"
    )]
    InvalidSplitRatio {
        /// Train ratio
        train: f64,
        /// Validate ratio
        validate: f64,
        /// Test ratio
        test: f64,
    },

    /// Fold count must be at least one and no larger than the unit count
    #[error("Invalid fold count {k} for {units} units")]
    InvalidFoldCount {
        /// Requested folds
        k: usize,
        /// Available grouping units
        units: usize,
    },

    /// Shard content does not match its declared shape
    #[error(
        "Shard {} (index {index}) mismatch: \
         expected {expected} rows, observed {observed_rows}x{observed_width}",
        path.display()
    )]
    ShardReadMismatch {
        /// Shard file
        path: PathBuf,
        /// Position in the flat partition
        index: usize,
        /// Declared record count
        expected: u64,
        /// Rows found on disk
        observed_rows: usize,
        /// Feature columns found on disk
        observed_width: usize,
    },

    /// Storage error (Parquet/Arrow layout)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Training capability failed
    #[error("Training failed: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
