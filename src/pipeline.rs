//! Per-job pipelines: inventory → locator → flattener → loader → booster →
//! artifacts.
//!
//! Each function is one self-contained job. Manifest, inventory and
//! configuration errors are returned; training and prediction failures are
//! logged and leave the corresponding artifacts unwritten.

use crate::booster::{test_logged, train_logged, Booster, FoldMetrics, EVAL_HEADER};
use crate::config::Config;
use crate::experiment::{ArtifactRecord, ArtifactStore};
use crate::inventory::{CruiseShards, Inventory, ShardLocator};
use crate::logging::JobLog;
use crate::partition::{
    flatten, merge_units, sample_units, shuffle_units, FlatPartition, PartitionMode,
};
use crate::split::{make_k_folds, train_validate_test_split_with_rng, FoldBoundary};
use crate::storage::{DenseDataset, DenseLoader};
use crate::{Error, Result};
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::Range;

/// What a training job produced
#[derive(Debug)]
pub struct TrainingSummary {
    /// Cruises in train/validate/test
    pub cruises: [usize; 3],
    /// Records in train/validate/test
    pub records: [usize; 3],
    /// Whether the booster returned a model
    pub model_trained: bool,
    /// Files written
    pub artifacts: Vec<ArtifactRecord>,
}

/// What one held-out fold produced
#[derive(Debug)]
pub struct FoldSummary {
    /// The fold's row range and counts
    pub fold: FoldBoundary,
    /// Whether the booster returned a model
    pub model_trained: bool,
    /// Files written
    pub artifacts: Vec<ArtifactRecord>,
}

/// Shared handles of one job
#[derive(Debug)]
pub struct JobContext<'a, B> {
    /// Run configuration
    pub config: &'a Config,
    /// Parsed manifest
    pub inventory: &'a Inventory,
    /// Training capability
    pub booster: &'a B,
    /// Artifact layout
    pub store: &'a ArtifactStore,
    /// The job's log sink
    pub log: &'a JobLog,
}

impl<B> Clone for JobContext<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for JobContext<'_, B> {}

/// Seeded when the config carries a seed, otherwise from OS entropy.
#[must_use]
pub fn run_rng(config: &Config) -> StdRng {
    config
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Cruise units of `regions`, region order then manifest order.
///
/// # Errors
/// Unknown region or inventory inconsistency.
pub fn cruise_units<S: AsRef<str>>(
    config: &Config,
    inventory: &Inventory,
    regions: &[S],
) -> Result<Vec<CruiseShards>> {
    let locator = ShardLocator::from_config(config);
    let located = locator.locate_regions(inventory, regions)?;
    match flatten(located, PartitionMode::PreserveCruise) {
        FlatPartition::Cruises(units) => Ok(units),
        FlatPartition::Shards(_) => Err(Error::StorageError(
            "flattener ignored cruise mode".to_string(),
        )),
    }
}

/// Load every shard of `units` and report skipped shards to the job log.
///
/// Rows of skipped shards stay in place, zero-filled, so row offsets keep
/// matching the declared counts.
///
/// # Errors
/// Only allocation-level failures.
pub fn load_units(config: &Config, units: &[CruiseShards], log: &JobLog) -> Result<DenseDataset> {
    let shards = merge_units(units);
    log.log(format!(
        "start loading data, {} cruises, {} parts",
        units.len(),
        shards.len()
    ));
    let dataset = DenseLoader::new(config.feature_width).load(&shards)?;
    for skipped in dataset.skipped() {
        log.log_fields([
            "failed to load".to_string(),
            skipped.path.display().to_string(),
            skipped.expected.to_string(),
            skipped.index.to_string(),
            skipped.cause.to_string(),
        ]);
    }
    log.log(format!("finished loading data, {} records", dataset.rows()));
    if dataset.skipped_rows() > 0 {
        log.log(format!("zero-filled records, {}", dataset.skipped_rows()));
    }
    Ok(dataset)
}

/// [`load_units`], then drop the zero-filled rows of skipped shards.
///
/// # Errors
/// As [`load_units`].
pub fn load_retained(
    config: &Config,
    units: &[CruiseShards],
    log: &JobLog,
) -> Result<DenseDataset> {
    let dataset = load_units(config, units, log)?;
    let excluded = dataset.skipped_rows();
    if excluded > 0 {
        log.log(format!("excluded zero-filled records, {excluded}"));
    }
    Ok(dataset.without_skipped())
}

/// Cruise-level train/validate/test split, train, test, persist.
///
/// `label` names the model in artifact paths (a region, or `all`).
///
/// # Errors
/// Inventory, split-ratio or artifact IO errors.
pub fn run_training<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    regions: &[S],
    label: &str,
    run_id: &str,
) -> Result<TrainingSummary> {
    train_with_rng(ctx, regions, label, run_id, &mut run_rng(ctx.config))
}

fn train_with_rng<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    regions: &[S],
    label: &str,
    run_id: &str,
    rng: &mut StdRng,
) -> Result<TrainingSummary> {
    let JobContext { config, inventory, booster, store, log } = *ctx;
    let units = cruise_units(config, inventory, regions)?;
    let split = train_validate_test_split_with_rng(units, config.split, true, rng)?;
    let cruises = [split.train.len(), split.validate.len(), split.test.len()];
    log.log(format!("cruises, {}, {}, {}", cruises[0], cruises[1], cruises[2]));

    let train = load_retained(config, &split.train, log)?;
    let validate = load_retained(config, &split.validate, log)?;
    let test = load_retained(config, &split.test, log)?;
    let records = [train.rows(), validate.rows(), test.rows()];

    let valid_set = (validate.rows() > 0).then(|| (validate.features(), validate.labels()));
    let model = train_logged(
        booster,
        &config.booster,
        train.features(),
        train.labels(),
        valid_set,
        log,
    );

    let mut artifacts = Vec::new();
    if let Some(written) = store.persist_model(label, model.as_ref(), run_id)? {
        artifacts.extend(written);
    }
    if let Some(model) = &model {
        let (features, labels) = (test.features(), test.labels());
        if test.rows() > 0 {
            if let Some(scores) = test_logged(booster, model, label, label, features, labels, log) {
                artifacts.push(
                    store.persist_predictions(label, label, features, labels, &scores, run_id)?,
                );
            }
        }
    } else {
        log.log(format!("no model produced for {label}, run {run_id}"));
    }

    Ok(TrainingSummary {
        cruises,
        records,
        model_trained: model.is_some(),
        artifacts,
    })
}

/// Train `label` once per run id `0..iterations`.
///
/// One generator drives every iteration, so each draws a new cruise split
/// and a seeded run stays reproducible.
///
/// # Errors
/// The first error of [`run_training`].
pub fn run_training_iterations<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    regions: &[S],
    label: &str,
    iterations: usize,
) -> Result<Vec<TrainingSummary>> {
    let mut rng = run_rng(ctx.config);
    (0..iterations)
        .map(|iteration| {
            ctx.log.log(format!("start iteration, {iteration}"));
            train_with_rng(ctx, regions, label, &iteration.to_string(), &mut rng)
        })
        .collect()
}

/// Score every region in `test_regions` with a persisted model.
///
/// Writes [`EVAL_HEADER`] to the job log before the first `eval` line.
///
/// # Errors
/// Missing model artifact, inventory or artifact IO errors.
pub fn run_testing<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    model_region: &str,
    test_regions: &[S],
    run_id: &str,
) -> Result<Vec<ArtifactRecord>> {
    let JobContext { config, inventory, booster, store, log } = *ctx;
    let model: B::Model = store.load_model(model_region, run_id)?;
    log.log(EVAL_HEADER);
    let mut artifacts = Vec::new();
    for test_region in test_regions {
        let test_region = test_region.as_ref();
        let units = cruise_units(config, inventory, &[test_region])?;
        let data = load_retained(config, &units, log)?;
        if data.rows() == 0 {
            log.log(format!("no records for {test_region}, skipping"));
            continue;
        }
        let (features, labels) = (data.features(), data.labels());
        let scored = test_logged(booster, &model, model_region, test_region, features, labels, log);
        if let Some(scores) = scored {
            artifacts.push(store.persist_predictions(
                model_region,
                test_region,
                features,
                labels,
                &scores,
                run_id,
            )?);
        }
    }
    Ok(artifacts)
}

/// Shuffle cruises, then keep each with the configured sample rate.
fn prepared_units<S: AsRef<str>>(
    config: &Config,
    inventory: &Inventory,
    regions: &[S],
    log: &JobLog,
) -> Result<Vec<CruiseShards>> {
    let mut rng = run_rng(config);
    let mut units = cruise_units(config, inventory, regions)?;
    shuffle_units(&mut units, &mut rng);
    log.log(format!("total number of cruises: {}", units.len()));
    if let Some(rate) = config.cruise_sample_rate {
        units = sample_units(units, rate, &mut rng);
        log.log(format!("sampled number of cruises: {}", units.len()));
    }
    Ok(units)
}

/// Delegate cross validation to the booster over the sampled cruises and
/// persist the per-fold metrics.
///
/// # Errors
/// Inventory errors, a booster `cv` failure, or artifact IO errors.
pub fn run_cv<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    regions: &[S],
    label: &str,
) -> Result<Vec<FoldMetrics>> {
    let JobContext { config, inventory, booster, store, log } = *ctx;
    let units = prepared_units(config, inventory, regions, log)?;
    let data = load_retained(config, &units, log)?;
    log.log("start cross validation");
    let results = booster.cv(&config.booster, data.data().view(), config.folds)?;
    log.log(format!("finished cross validation, {} folds", results.len()));
    store.persist_cv_results(label, &results, "0")?;
    Ok(results)
}

fn to_rows(range: Range<u64>) -> Result<Range<usize>> {
    let convert = |v: u64| {
        usize::try_from(v).map_err(|_| Error::StorageError(format!("row {v} out of range")))
    };
    Ok(convert(range.start)?..convert(range.end)?)
}

fn row_count(ranges: &[Range<usize>]) -> usize {
    ranges.iter().map(|r| r.len()).sum()
}

/// Cruise-level k-fold cross validation on one loaded array.
///
/// Folds are computed from declared counts before loading; each fold is
/// then held out by row offset while the booster trains on the rest.
/// Zero-filled rows of skipped shards are left out of both sides.
/// Fold `i` writes its artifacts with run id `i`.
///
/// # Errors
/// Inventory errors, an invalid fold count, or artifact IO errors.
pub fn run_cv_folds<B: Booster, S: AsRef<str>>(
    ctx: &JobContext<'_, B>,
    regions: &[S],
    label: &str,
) -> Result<Vec<FoldSummary>> {
    let JobContext { config, inventory, booster, store, log } = *ctx;
    let units = prepared_units(config, inventory, regions, log)?;
    let kfolds = make_k_folds(&units, config.folds)?;
    log.log(format!("fold size, {}", units.len() / config.folds));
    let data = load_units(config, &units, log)?;

    let mut summaries = Vec::with_capacity(kfolds.folds.len());
    for fold in kfolds.folds {
        let run_id = fold.index.to_string();
        log.log(format!("start training, {}", fold.index));
        log.log_fields([
            "stats".to_string(),
            (kfolds.total - fold.record_count).to_string(),
            (kfolds.total_bad - fold.bad_count).to_string(),
            fold.record_count.to_string(),
            fold.bad_count.to_string(),
        ]);

        let [before, after] = fold.complement(kfolds.total);
        let mut train_rows = data.loaded_ranges(to_rows(before)?);
        train_rows.extend(data.loaded_ranges(to_rows(after)?));
        let held_rows = data.loaded_ranges(to_rows(fold.rows())?);
        #[allow(clippy::cast_possible_truncation)]
        let excluded = [
            (kfolds.total - fold.record_count) as usize - row_count(&train_rows),
            fold.record_count as usize - row_count(&held_rows),
        ];
        if excluded != [0, 0] {
            log.log(format!(
                "excluded zero-filled records, {}, {}, {}",
                fold.index, excluded[0], excluded[1]
            ));
        }

        let train: Array2<f64> = data.gather_rows(&train_rows);
        let model = train_logged(
            booster,
            &config.booster,
            train.slice(s![.., 1..]),
            train.column(0),
            None,
            log,
        );
        drop(train);

        let mut artifacts = Vec::new();
        if let Some(written) = store.persist_model(label, model.as_ref(), &run_id)? {
            artifacts.extend(written);
        }
        if let Some(model) = &model {
            log.log(format!("start testing, {}, {}, {}", fold.index, fold.start, fold.end));
            let held_out = data.gather_rows(&held_rows);
            let features = held_out.slice(s![.., 1..]);
            let labels = held_out.column(0);
            if let Some(scores) = test_logged(booster, model, label, label, features, labels, log) {
                artifacts.push(
                    store.persist_predictions(label, label, features, labels, &scores, &run_id)?,
                );
            }
        }
        summaries.push(FoldSummary {
            fold,
            model_trained: model.is_some(),
            artifacts,
        });
    }
    Ok(summaries)
}
