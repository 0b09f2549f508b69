//! Dense loader (Arrow/Parquet shards → `ndarray`)
//!
//! **Pre-allocation contract**: the output array is sized once from the
//! declared shard counts and every shard is streamed into its own row range.
//! At tens of millions of records, growing an array shard by shard costs a
//! full copy per resize.
//!
//! **Skip-and-report**: a shard whose content disagrees with its declared
//! count is logged and skipped; its rows stay zero and are recorded so the
//! pipelines can leave them out. A multi-hour load is not aborted because of
//! one malformed source file.

pub mod shard;

use crate::inventory::ShardRef;
use crate::{Error, Result};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// A shard left out of a dense load
#[derive(Debug)]
pub struct SkippedShard {
    /// Position in the flat partition
    pub index: usize,
    /// Shard file
    pub path: PathBuf,
    /// Declared record count
    pub expected: u64,
    /// Zero-filled rows of the dense array
    pub rows: Range<usize>,
    /// Why it was skipped
    pub cause: Error,
}

/// Dense `(records, width + 1)` array; column 0 is the label
#[derive(Debug)]
pub struct DenseDataset {
    data: Array2<f64>,
    skipped: Vec<SkippedShard>,
}

impl DenseDataset {
    /// Wrap an already assembled array.
    #[must_use]
    pub const fn new(data: Array2<f64>) -> Self {
        Self {
            data,
            skipped: Vec::new(),
        }
    }

    /// Full array
    #[must_use]
    pub const fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Take the array
    #[must_use]
    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    /// Row count
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Label column
    #[must_use]
    pub fn labels(&self) -> ArrayView1<'_, f64> {
        self.data.column(0)
    }

    /// Feature columns
    #[must_use]
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.data.slice(s![.., 1..])
    }

    /// Shards skipped during the load
    #[must_use]
    pub fn skipped(&self) -> &[SkippedShard] {
        &self.skipped
    }

    /// Rows zero-filled for skipped shards
    #[must_use]
    pub fn skipped_rows(&self) -> usize {
        self.skipped.iter().map(|s| s.rows.len()).sum()
    }

    /// The parts of `rows` that hold loaded records, in order.
    #[must_use]
    pub fn loaded_ranges(&self, rows: Range<usize>) -> Vec<Range<usize>> {
        let mut holes: Vec<&Range<usize>> = self.skipped.iter().map(|s| &s.rows).collect();
        holes.sort_by_key(|h| h.start);
        let mut ranges = Vec::new();
        let mut start = rows.start;
        for hole in holes {
            if hole.end <= start || hole.start >= rows.end {
                continue;
            }
            if hole.start > start {
                ranges.push(start..hole.start);
            }
            start = hole.end;
        }
        if start < rows.end {
            ranges.push(start..rows.end);
        }
        ranges
    }

    /// Drop the zero-filled rows of skipped shards.
    #[must_use]
    pub fn without_skipped(self) -> Self {
        if self.skipped.is_empty() {
            return self;
        }
        let ranges = self.loaded_ranges(0..self.rows());
        Self::new(self.gather_rows(&ranges))
    }

    /// View of a contiguous row range.
    #[must_use]
    pub fn row_range(&self, rows: Range<usize>) -> ArrayView2<'_, f64> {
        self.data.slice(s![rows, ..])
    }

    /// Copy the rows of several ranges into a new array, in order.
    #[must_use]
    pub fn gather_rows(&self, ranges: &[Range<usize>]) -> Array2<f64> {
        let indices: Vec<usize> = ranges.iter().flat_map(Clone::clone).collect();
        self.data.select(Axis(0), &indices)
    }
}

/// Loads flat shard partitions into one pre-sized array.
#[derive(Debug, Clone, Copy)]
pub struct DenseLoader {
    feature_width: usize,
}

impl DenseLoader {
    /// Loader for shards with `feature_width` feature columns.
    #[must_use]
    pub const fn new(feature_width: usize) -> Self {
        Self { feature_width }
    }

    /// Columns of the output array (label included)
    #[must_use]
    pub const fn columns(&self) -> usize {
        self.feature_width + 1
    }

    /// Load `shards` into a `(sum of counts, width + 1)` array.
    ///
    /// Mismatched or unreadable shards are recorded in
    /// [`DenseDataset::skipped`] and logged; they do not fail the load.
    ///
    /// # Errors
    /// Returns error only if the declared total cannot be allocated.
    pub fn load(&self, shards: &[ShardRef]) -> Result<DenseDataset> {
        let total: u64 = shards.iter().map(ShardRef::count).sum();
        let cols = self.columns();
        let rows = usize::try_from(total)
            .ok()
            .filter(|r| r.checked_mul(cols).is_some())
            .ok_or_else(|| {
                Error::StorageError(format!("{total} records exceed addressable memory"))
            })?;
        tracing::info!(shards = shards.len(), rows, cols, "allocating dense array");

        let mut data = Array2::<f64>::zeros((rows, cols));
        let buffer = data
            .as_slice_mut()
            .ok_or_else(|| Error::StorageError("non-contiguous dense buffer".to_string()))?;

        // Hand each shard its own disjoint row block.
        let mut blocks = Vec::with_capacity(shards.len());
        let mut rest = buffer;
        let mut row = 0;
        for (index, part) in shards.iter().enumerate() {
            // Fits: the sum of all counts was checked above.
            #[allow(clippy::cast_possible_truncation)]
            let count = part.count() as usize;
            let (block, tail) = std::mem::take(&mut rest).split_at_mut(count * cols);
            blocks.push((index, row..row + count, part, block));
            rest = tail;
            row += count;
        }

        let width = self.feature_width;
        let read = |(index, rows, part, block): (usize, Range<usize>, &ShardRef, &mut [f64])| {
            let outcome = shard::read_shard_into(part.path(), index, part.count(), width, block);
            outcome.err().map(|cause| {
                block.fill(0.0);
                tracing::warn!(
                    shard = %part.path().display(),
                    expected = part.count(),
                    index,
                    error = %cause,
                    "skipping shard"
                );
                SkippedShard {
                    index,
                    path: part.path().to_path_buf(),
                    expected: part.count(),
                    rows,
                    cause,
                }
            })
        };

        #[cfg(feature = "rayon")]
        let skipped: Vec<SkippedShard> = {
            use rayon::prelude::*;
            blocks.into_par_iter().filter_map(read).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let skipped: Vec<SkippedShard> = blocks.into_iter().filter_map(read).collect();

        Ok(DenseDataset { data, skipped })
    }
}

/// Read shards of unknown size by accumulation, without pre-allocation.
///
/// Row counts are taken from each file. Every shard must have
/// `feature_width` feature columns; anything else fails the read.
///
/// # Errors
/// [`Error::ShardReadMismatch`] on a width mismatch, or the storage error of
/// an unreadable shard.
pub fn read_data<P: AsRef<Path>>(paths: &[P], feature_width: usize) -> Result<Array2<f64>> {
    let cols = feature_width + 1;
    let mut values: Vec<f64> = Vec::new();
    let mut rows = 0usize;
    for (index, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let (shard_rows, width) = shard::shard_shape(path)?;
        if width != feature_width {
            return Err(Error::ShardReadMismatch {
                path: path.to_path_buf(),
                index,
                expected: shard_rows as u64,
                observed_rows: shard_rows,
                observed_width: width,
            });
        }
        let start = values.len();
        values.resize(start + shard_rows * cols, 0.0);
        shard::read_shard_into(path, index, shard_rows as u64, width, &mut values[start..])?;
        rows += shard_rows;
    }
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Error::StorageError(format!("Failed to shape accumulated shards: {e}")))
}
