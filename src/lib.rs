//! # bathyshard: sharded bathymetry training-data partitioning
//!
//! Bathymetry soundings are grouped by region and cruise and stored as
//! fixed-size Parquet shards. This crate turns a manifest of those cruises
//! into dense in-memory training arrays, splits them at cruise granularity
//! (train/validate/test or k folds), hands them to a gradient-boosting
//! capability, and persists models and per-record scores.
//!
//! ```text
//! manifest ─► Inventory ─► ShardLocator ─► flatten ─► split / k-fold
//!                                                          │
//!                           ArtifactStore ◄─ Booster ◄─ DenseLoader
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bathyshard::inventory::{load_inventory, ShardLocator};
//! use bathyshard::storage::DenseLoader;
//!
//! let inventory = load_inventory("/data/manifest.tsv")?;
//! let locator = ShardLocator::new("/data/shards", "parquet", 100_000);
//! let units = locator.locate_region(&inventory, "NGDC")?;
//! let shards: Vec<_> = units.into_iter().flat_map(|u| u.shards).collect();
//!
//! let dataset = DenseLoader::new(4).load(&shards)?;
//! println!("{} rows, {} skipped shards", dataset.rows(), dataset.skipped().len());
//! # Ok::<(), bathyshard::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod booster;
pub mod config;
pub mod error;
pub mod experiment;
pub mod inventory;
pub mod logging;
#[cfg(feature = "tokio")]
pub mod orchestrator;
pub mod partition;
pub mod pipeline;
pub mod split;
pub mod storage;

pub use error::{Error, Result};
