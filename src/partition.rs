//! Partition flattener
//!
//! Collapses region → cruise → shard into either a cruise-preserving list
//! (what the split/fold engine needs, since cruises are the leakage-safe
//! grouping unit) or one flat shard list (all the dense loader needs).

use crate::inventory::{Cruise, CruiseShards, ShardRef};
use rand::seq::SliceRandom;
use rand::Rng;

/// Granularity of a flattened partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Keep each cruise's shard list together
    PreserveCruise,
    /// One ordered shard list, cruise grouping discarded
    Flatten,
}

/// Output of [`flatten`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatPartition {
    /// Cruises in region order, each with its shards
    Cruises(Vec<CruiseShards>),
    /// Shards in region, cruise, index order
    Shards(Vec<ShardRef>),
}

impl FlatPartition {
    /// Sum of declared shard counts.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        match self {
            Self::Cruises(units) => units.iter().map(|u| u.total).sum(),
            Self::Shards(shards) => shards.iter().map(ShardRef::count).sum(),
        }
    }

    /// Flat shard list, whichever flavor this is.
    #[must_use]
    pub fn into_shards(self) -> Vec<ShardRef> {
        match self {
            Self::Cruises(units) => merge_units(&units),
            Self::Shards(shards) => shards,
        }
    }
}

/// Values the split/fold engine can weigh without touching shard data.
pub trait RecordCounts {
    /// Records in the unit
    fn record_count(&self) -> u64;
    /// Bad-labelled records in the unit
    fn bad_count(&self) -> u64;
}

impl RecordCounts for CruiseShards {
    fn record_count(&self) -> u64 {
        self.total
    }

    fn bad_count(&self) -> u64 {
        self.bad
    }
}

impl RecordCounts for Cruise {
    fn record_count(&self) -> u64 {
        self.total()
    }

    fn bad_count(&self) -> u64 {
        self.bad()
    }
}

impl RecordCounts for (u64, u64) {
    fn record_count(&self) -> u64 {
        self.0
    }

    fn bad_count(&self) -> u64 {
        self.1
    }
}

/// Collapse per-region cruise lists at the requested granularity.
#[must_use]
pub fn flatten(regions: Vec<Vec<CruiseShards>>, mode: PartitionMode) -> FlatPartition {
    let units: Vec<CruiseShards> = regions.into_iter().flatten().collect();
    match mode {
        PartitionMode::PreserveCruise => FlatPartition::Cruises(units),
        PartitionMode::Flatten => FlatPartition::Shards(merge_units(&units)),
    }
}

/// Concatenate the shard lists of `units`, keeping order.
#[must_use]
pub fn merge_units(units: &[CruiseShards]) -> Vec<ShardRef> {
    units.iter().flat_map(|u| u.shards.iter().cloned()).collect()
}

/// Shuffle units in place.
pub fn shuffle_units<T, R: Rng + ?Sized>(units: &mut [T], rng: &mut R) {
    units.shuffle(rng);
}

/// Keep each unit independently with probability `rate`, preserving order.
#[must_use]
pub fn sample_units<T, R: Rng + ?Sized>(units: Vec<T>, rate: f64, rng: &mut R) -> Vec<T> {
    units
        .into_iter()
        .filter(|_| rng.gen::<f64>() <= rate)
        .collect()
}
