//! Split/fold engine
//!
//! Both operations work on grouping units (cruises), never on individual
//! records: records of one cruise are strongly correlated, so a record-level
//! split would leak signal from train into test.
//!
//! - [`train_validate_test_split`] slices a (optionally shuffled) unit list
//!   by unit count. Proportions of *records* are therefore approximate.
//! - [`make_k_folds`] turns unit windows into contiguous row ranges of the
//!   flattened array using running sums of the declared counts, so the data
//!   is loaded once and folds are addressed by offset.

use crate::config::SplitRatios;
use crate::partition::RecordCounts;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::ops::Range;

/// Disjoint train/validate/test groups of units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
    /// Training units
    pub train: Vec<T>,
    /// Validation units
    pub validate: Vec<T>,
    /// Held-out test units
    pub test: Vec<T>,
}

/// Split units using the process-level random source when `shuffle` is set.
///
/// # Errors
/// [`Error::InvalidSplitRatio`] unless the ratios sum to exactly 1.0.
pub fn train_validate_test_split<T>(
    units: Vec<T>,
    ratios: SplitRatios,
    shuffle: bool,
) -> Result<Split<T>> {
    train_validate_test_split_with_rng(units, ratios, shuffle, &mut rand::thread_rng())
}

/// Split units, shuffling with the caller's `rng` when `shuffle` is set.
///
/// Boundaries are `floor(n * train)` and `floor(n * (train + validate))`;
/// the remaining units go to test.
///
/// # Errors
/// [`Error::InvalidSplitRatio`] unless the ratios sum to exactly 1.0.
#[allow(clippy::float_cmp)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub fn train_validate_test_split_with_rng<T, R: Rng + ?Sized>(
    mut units: Vec<T>,
    ratios: SplitRatios,
    shuffle: bool,
    rng: &mut R,
) -> Result<Split<T>> {
    let SplitRatios {
        train,
        validate,
        test,
    } = ratios;
    let ratios_valid = [train, validate, test].iter().all(|r| (0.0..=1.0).contains(r));
    if !ratios_valid || train + validate + test != 1.0 {
        return Err(Error::InvalidSplitRatio {
            train,
            validate,
            test,
        });
    }
    if shuffle {
        units.shuffle(rng);
    }

    let n = units.len();
    let first = ((n as f64 * train).floor() as usize).min(n);
    let second = ((n as f64 * (train + validate)).floor() as usize).clamp(first, n);

    let test_units = units.split_off(second);
    let validate_units = units.split_off(first);
    Ok(Split {
        train: units,
        validate: validate_units,
        test: test_units,
    })
}

/// One held-out segment of the flattened array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldBoundary {
    /// Fold number, from 0
    pub index: usize,
    /// First row (inclusive)
    pub start: u64,
    /// Last row (exclusive)
    pub end: u64,
    /// Records inside the fold
    pub record_count: u64,
    /// Bad-labelled records inside the fold
    pub bad_count: u64,
}

impl FoldBoundary {
    /// Row range of the fold.
    #[must_use]
    pub const fn rows(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Row ranges outside the fold, i.e. the training rows for this fold.
    #[must_use]
    pub const fn complement(&self, total: u64) -> [Range<u64>; 2] {
        [0..self.start, self.end..total]
    }
}

/// Fold boundaries plus the totals they partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KFolds {
    /// Contiguous folds covering `[0, total)`
    pub folds: Vec<FoldBoundary>,
    /// Total records over all units
    pub total: u64,
    /// Total bad-labelled records over all units
    pub total_bad: u64,
}

/// Build `k` contiguous folds of `floor(units / k)` units each.
///
/// The last fold absorbs the remaining units. Boundaries are running sums of
/// the declared unit counts; no data is read.
///
/// # Errors
/// [`Error::InvalidFoldCount`] if `k` is zero or exceeds the unit count.
pub fn make_k_folds<U: RecordCounts>(units: &[U], k: usize) -> Result<KFolds> {
    if k == 0 || k > units.len() {
        return Err(Error::InvalidFoldCount {
            k,
            units: units.len(),
        });
    }
    let fold_size = units.len() / k;
    tracing::debug!(units = units.len(), k, fold_size, "computing folds");

    let mut folds = Vec::with_capacity(k);
    let mut cursor = 0u64;
    for index in 0..k {
        let begin = index * fold_size;
        let end = if index + 1 == k { units.len() } else { begin + fold_size };
        let window = &units[begin..end];
        let record_count: u64 = window.iter().map(RecordCounts::record_count).sum();
        let bad_count: u64 = window.iter().map(RecordCounts::bad_count).sum();
        folds.push(FoldBoundary {
            index,
            start: cursor,
            end: cursor + record_count,
            record_count,
            bad_count,
        });
        cursor += record_count;
    }

    Ok(KFolds {
        folds,
        total: cursor,
        total_bad: units.iter().map(RecordCounts::bad_count).sum(),
    })
}
