//! Shard locator: expands a cruise row into its ordered shard list.

use super::{Cruise, Inventory};
use crate::config::Config;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// One on-disk shard and its declared record count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRef {
    path: PathBuf,
    count: u64,
}

impl ShardRef {
    /// Create a shard reference.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, count: u64) -> Self {
        Self {
            path: path.into(),
            count,
        }
    }

    /// Shard file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared record count
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

/// A cruise expanded into shards, with its record and bad-label totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CruiseShards {
    /// Owning region
    pub region: String,
    /// Cruise name
    pub cruise: String,
    /// Shards in index order
    pub shards: Vec<ShardRef>,
    /// Total records (equals the sum of shard counts)
    pub total: u64,
    /// Records labelled bad
    pub bad: u64,
}

/// Records covered by `shard_count` shards of `chunk_size` records, with the
/// last shard holding the remainder of `total`.
///
/// `None` when the product overflows `u64`.
#[must_use]
pub fn assigned_total(total: u64, chunk_size: u64, shard_count: u64) -> Option<u64> {
    if shard_count == 0 || chunk_size == 0 {
        return Some(0);
    }
    let remainder = total % chunk_size;
    let last = if remainder == 0 { chunk_size } else { remainder };
    (shard_count - 1).checked_mul(chunk_size)?.checked_add(last)
}

/// Per-shard record counts for a cruise of `total` records.
///
/// Every shard holds `chunk_size` records except the last, which holds
/// `total % chunk_size` unless that remainder is zero. Empty when the shard
/// arithmetic overflows.
#[must_use]
pub fn shard_counts(total: u64, chunk_size: u64, shard_count: u64) -> Vec<u64> {
    if shard_count == 0 || chunk_size == 0 {
        return Vec::new();
    }
    if assigned_total(total, chunk_size, shard_count).is_none() {
        return Vec::new();
    }
    let Ok(full) = usize::try_from(shard_count - 1) else {
        return Vec::new();
    };
    let remainder = total % chunk_size;
    let last = if remainder == 0 { chunk_size } else { remainder };
    let mut counts = vec![chunk_size; full];
    counts.push(last);
    counts
}

/// Synthesizes shard paths `<data_root>/<region>/<cruise>_part<NNNNNN>.<ext>`.
#[derive(Debug, Clone)]
pub struct ShardLocator {
    data_root: PathBuf,
    extension: String,
    chunk_size: u64,
}

impl ShardLocator {
    /// Create a locator.
    #[must_use]
    pub fn new(
        data_root: impl Into<PathBuf>,
        extension: impl Into<String>,
        chunk_size: u64,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            extension: extension.into(),
            chunk_size,
        }
    }

    /// Locator for the paths and chunk size of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data_root, &config.shard_extension, config.chunk_size)
    }

    /// Configured chunk size
    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Path of shard `index` of `cruise` in `region`.
    #[must_use]
    pub fn shard_path(&self, region: &str, cruise: &str, index: u64) -> PathBuf {
        self.data_root
            .join(region)
            .join(format!("{cruise}_part{index:06}.{}", self.extension))
    }

    /// Expand one cruise into its shard list.
    ///
    /// # Errors
    /// [`Error::InventoryInconsistency`] if the synthesized shard counts do
    /// not add up to the manifest total. Overflowing shard arithmetic reports
    /// `assigned` as `u64::MAX`.
    pub fn locate(&self, cruise: &Cruise) -> Result<CruiseShards> {
        let assigned = assigned_total(cruise.total(), self.chunk_size, cruise.shard_count());
        if assigned != Some(cruise.total()) {
            return Err(Error::InventoryInconsistency {
                region: cruise.region().to_string(),
                cruise: cruise.name().to_string(),
                expected: cruise.total(),
                assigned: assigned.unwrap_or(u64::MAX),
            });
        }
        let counts = shard_counts(cruise.total(), self.chunk_size, cruise.shard_count());
        let shards = counts
            .into_iter()
            .zip(0..)
            .map(|(count, index)| {
                ShardRef::new(self.shard_path(cruise.region(), cruise.name(), index), count)
            })
            .collect();
        Ok(CruiseShards {
            region: cruise.region().to_string(),
            cruise: cruise.name().to_string(),
            shards,
            total: cruise.total(),
            bad: cruise.bad(),
        })
    }

    /// Expand every cruise of a region, in manifest order.
    ///
    /// # Errors
    /// [`Error::UnknownRegion`] or the first [`Error::InventoryInconsistency`].
    pub fn locate_region(&self, inventory: &Inventory, region: &str) -> Result<Vec<CruiseShards>> {
        inventory
            .cruises(region)?
            .iter()
            .map(|cruise| self.locate(cruise))
            .collect()
    }

    /// Expand several regions, keeping region order.
    ///
    /// # Errors
    /// As [`ShardLocator::locate_region`].
    pub fn locate_regions<S: AsRef<str>>(
        &self,
        inventory: &Inventory,
        regions: &[S],
    ) -> Result<Vec<Vec<CruiseShards>>> {
        regions
            .iter()
            .map(|region| self.locate_region(inventory, region.as_ref()))
            .collect()
    }
}
