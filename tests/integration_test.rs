//! End-to-end tests: shards on disk → inventory → loader → pipelines →
//! artifacts.

use bathyshard::booster::{Booster, FoldMetrics, PriorBooster, PriorModel, ValidSet};
use bathyshard::config::Config;
use bathyshard::experiment::{ArtifactKind, ArtifactStore};
use bathyshard::inventory::{load_inventory, Cruise, Inventory, ShardLocator};
use bathyshard::logging::JobLog;
use bathyshard::orchestrator::{run_jobs, Job};
use bathyshard::partition::{flatten, FlatPartition, PartitionMode};
use bathyshard::booster::EVAL_HEADER;
use bathyshard::pipeline::{
    run_cv, run_cv_folds, run_testing, run_training, run_training_iterations, JobContext,
};
use bathyshard::storage::shard::write_cruise_shards;
use bathyshard::storage::DenseLoader;
use bathyshard::Error;
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const WIDTH: usize = 4;

#[allow(clippy::cast_precision_loss)]
fn cruise_rows(rows: usize, offset: usize) -> (Array2<f64>, Vec<i32>) {
    let features = Array2::from_shape_fn((rows, WIDTH), |(r, c)| ((offset + r) * 10 + c) as f64);
    let labels = (0..rows).map(|r| i32::from((offset + r) % 3 != 0)).collect();
    (features, labels)
}

/// Write `cruises` (region, name, rows) as shards and a manifest; return the
/// config pointing at them.
fn fixture(dir: &Path, chunk: u64, cruises: &[(&str, &str, usize)]) -> Config {
    let data_root = dir.join("shards");
    let locator = ShardLocator::new(&data_root, "parquet", chunk);
    let mut written = Vec::new();
    let mut offset = 0;
    for &(region, name, rows) in cruises {
        let (features, labels) = cruise_rows(rows, offset);
        let cruise = write_cruise_shards(&locator, region, name, features.view(), &labels).unwrap();
        written.push(cruise);
        offset += rows;
    }
    let manifest = dir.join("manifest.tsv");
    Inventory::from_cruises(written).write_manifest(&manifest).unwrap();

    let base_dir = dir.join("work");
    let mut config = Config::new(data_root, manifest, &base_dir, chunk, WIDTH);
    config.seed = Some(7);
    ArtifactStore::new(&base_dir).init().unwrap();
    config
}

fn ten_cruise_regions() -> Vec<(&'static str, &'static str, usize)> {
    let names = ["c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9"];
    let mut cruises = Vec::new();
    for region in ["NGDC", "SIO"] {
        for (i, name) in names.iter().enumerate() {
            cruises.push((region, *name, 40 + i * 7));
        }
    }
    cruises
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    inventory: Inventory,
    store: ArtifactStore,
    log: JobLog,
}

impl Fixture {
    fn new(chunk: u64, cruises: &[(&str, &str, usize)]) -> Self {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path(), chunk, cruises);
        let inventory = load_inventory(&config.manifest_path).unwrap();
        let store = ArtifactStore::new(&config.base_dir);
        let log = JobLog::open(&config.base_dir, "test_job").unwrap();
        Self {
            _dir: dir,
            config,
            inventory,
            store,
            log,
        }
    }

    fn ctx<'a, B>(&'a self, booster: &'a B) -> JobContext<'a, B> {
        JobContext {
            config: &self.config,
            inventory: &self.inventory,
            booster,
            store: &self.store,
            log: &self.log,
        }
    }
}

/// Booster whose training always fails.
struct BrokenBooster;

impl Booster for BrokenBooster {
    type Model = PriorModel;

    fn train(
        &self,
        _params: &serde_json::Value,
        _features: ArrayView2<'_, f64>,
        _labels: ArrayView1<'_, f64>,
        _valid: Option<ValidSet<'_>>,
    ) -> bathyshard::Result<PriorModel> {
        Err(Error::Training("out of memory".to_string()))
    }

    fn predict(
        &self,
        _model: &PriorModel,
        features: ArrayView2<'_, f64>,
    ) -> bathyshard::Result<Vec<f64>> {
        Ok(vec![0.5; features.nrows()])
    }

    fn cv(
        &self,
        _params: &serde_json::Value,
        _data: ArrayView2<'_, f64>,
        _n_folds: usize,
    ) -> bathyshard::Result<Vec<FoldMetrics>> {
        Err(Error::Training("cv unsupported".to_string()))
    }
}

#[test]
fn test_cruise_shards_load_into_dense_array() {
    let f = Fixture::new(1000, &[("NGDC", "EW9009", 2500)]);
    let locator = ShardLocator::from_config(&f.config);
    let unit = locator.locate(f.inventory.cruise("NGDC", "EW9009").unwrap()).unwrap();
    let counts: Vec<u64> = unit.shards.iter().map(|s| s.count()).collect();
    assert_eq!(counts, vec![1000, 1000, 500]);

    let dataset = DenseLoader::new(WIDTH).load(&unit.shards).unwrap();
    assert_eq!(dataset.rows(), 2500);
    assert!(dataset.skipped().is_empty());

    let (features, labels) = cruise_rows(2500, 0);
    assert_eq!(dataset.features(), features.view());
    let expected: Vec<f64> = labels.iter().map(|&l| f64::from(l)).collect();
    assert_eq!(dataset.labels().to_vec(), expected);
}

#[test]
fn test_missing_shard_is_zero_filled_and_reported() {
    let f = Fixture::new(1000, &[("NGDC", "EW9009", 2500)]);
    let locator = ShardLocator::from_config(&f.config);
    std::fs::remove_file(locator.shard_path("NGDC", "EW9009", 1)).unwrap();

    let unit = locator.locate(f.inventory.cruise("NGDC", "EW9009").unwrap()).unwrap();
    let dataset = DenseLoader::new(WIDTH).load(&unit.shards).unwrap();

    assert_eq!(dataset.rows(), 2500);
    assert_eq!(dataset.skipped().len(), 1);
    assert_eq!(dataset.skipped()[0].index, 1);
    assert_eq!(dataset.skipped()[0].expected, 1000);
    assert!(dataset.row_range(1000..2000).iter().all(|&v| v == 0.0));
    assert!((dataset.row_range(2000..2001)[[0, 1]] - 20_000.0).abs() < f64::EPSILON);
}

#[test]
fn test_short_shard_is_skipped_not_fatal() {
    let f = Fixture::new(1000, &[("NGDC", "EW9009", 2500)]);
    let locator = ShardLocator::from_config(&f.config);
    // Declared 500 records, shard now holds 3.
    let (features, labels) = cruise_rows(3, 0);
    let path = locator.shard_path("NGDC", "EW9009", 2);
    bathyshard::storage::shard::write_shard(&path, features.view(), &labels).unwrap();

    let unit = locator.locate(f.inventory.cruise("NGDC", "EW9009").unwrap()).unwrap();
    let dataset = DenseLoader::new(WIDTH).load(&unit.shards).unwrap();
    assert_eq!(dataset.skipped().len(), 1);
    assert!(matches!(
        dataset.skipped()[0].cause,
        Error::ShardReadMismatch { observed_rows: 3, .. }
    ));
    assert!(dataset.row_range(2000..2500).iter().all(|&v| v == 0.0));
}

#[test]
fn test_inconsistent_manifest_is_rejected() {
    let locator = ShardLocator::new("/data", "parquet", 1000);
    let cruise = Cruise::new("NGDC", "EW9009", 2500, 0, 2);
    assert!(matches!(
        locator.locate(&cruise),
        Err(Error::InventoryInconsistency { expected: 2500, assigned: 1500, .. })
    ));
}

#[test]
fn test_corrupted_shard_counts_are_rejected_not_panicking() {
    let inventory =
        Inventory::parse("NGDC\tcruiseA\t250000\t500\t2305843009213693952\n").unwrap();
    let locator = ShardLocator::new("/data", "parquet", 100_000);
    assert!(matches!(
        locator.locate_region(&inventory, "NGDC"),
        Err(Error::InventoryInconsistency { expected: 250_000, .. })
    ));

    let inventory = Inventory::parse("NGDC\tcruiseA\t5\t0\t3\n").unwrap();
    let locator = ShardLocator::new("/data", "parquet", 1 << 63);
    assert!(matches!(
        locator.locate_region(&inventory, "NGDC"),
        Err(Error::InventoryInconsistency { expected: 5, .. })
    ));
}

#[test]
fn test_flatten_preserves_region_and_cruise_order() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let locator = ShardLocator::from_config(&f.config);
    let regions = locator.locate_regions(&f.inventory, &["SIO", "NGDC"]).unwrap();
    let FlatPartition::Cruises(units) = flatten(regions, PartitionMode::PreserveCruise) else {
        panic!("expected cruise units");
    };
    assert_eq!(units.len(), 20);
    assert_eq!(units[0].region, "SIO");
    assert_eq!(units[10].region, "NGDC");
    assert_eq!(units.iter().map(|u| u.total).sum::<u64>(), 2 * (10 * 40 + 7 * 45));
}

#[test]
fn test_training_pipeline_persists_artifacts() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let summary = run_training(&f.ctx(&PriorBooster), &["NGDC"], "NGDC", "0").unwrap();

    assert_eq!(summary.cruises, [7, 1, 2]);
    assert!(summary.model_trained);
    assert_eq!(summary.records.iter().sum::<usize>(), 10 * 40 + 7 * 45);

    let kinds: Vec<ArtifactKind> = summary.artifacts.iter().map(|a| a.kind()).collect();
    assert_eq!(
        kinds,
        vec![ArtifactKind::Model, ArtifactKind::ModelDump, ArtifactKind::Predictions]
    );
    assert!(summary.artifacts.iter().all(|a| a.path().exists()));

    let predictions = f.store.load_predictions("NGDC", "NGDC", "0").unwrap();
    assert_eq!(predictions.labels.len(), summary.records[2]);
    assert_eq!(predictions.features.ncols(), 4);
    assert!(predictions.scores.iter().all(|&s| s > 0.0 && s < 1.0));

    let log = std::fs::read_to_string(f.config.base_dir.join("test_job.log")).unwrap();
    assert!(log.contains("eval, NGDC, NGDC, 0"));
}

#[test]
fn test_training_failure_leaves_no_model() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let summary = run_training(&f.ctx(&BrokenBooster), &["SIO"], "SIO", "3").unwrap();

    assert!(!summary.model_trained);
    assert!(summary.artifacts.is_empty());
    assert!(!f.store.model_path("SIO", "3").exists());
    let log = std::fs::read_to_string(f.config.base_dir.join("test_job.log")).unwrap();
    assert!(log.contains("training failed"));
}

#[test]
fn test_cross_region_testing() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let ctx = f.ctx(&PriorBooster);
    run_training(&ctx, &["NGDC"], "NGDC", "0").unwrap();

    let written = run_testing(&ctx, "NGDC", &["NGDC", "SIO"], "0").unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[1].test_region(), Some("SIO"));

    let sio = f.store.load_predictions("NGDC", "SIO", "0").unwrap();
    assert_eq!(sio.labels.len(), 10 * 40 + 7 * 45);
}

#[test]
fn test_all_regions_model_scores_every_region() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let ctx = f.ctx(&PriorBooster);
    let summary = run_training(&ctx, &["NGDC", "SIO"], "all", "0").unwrap();
    assert!(summary.model_trained);

    let written = run_testing(&ctx, "all", &["NGDC", "SIO"], "0").unwrap();
    assert_eq!(written.len(), 2);
    for region in ["NGDC", "SIO"] {
        let scored = f.store.load_predictions("all", region, "0").unwrap();
        assert_eq!(scored.labels.len(), 10 * 40 + 7 * 45);
    }

    let log = std::fs::read_to_string(f.config.base_dir.join("test_job.log")).unwrap();
    let header = log.find(EVAL_HEADER).unwrap();
    assert!(header < log.find("eval, all, NGDC, 0").unwrap());
    assert!(log.contains("eval, all, SIO, 0"));
}

#[test]
fn test_repeated_training_writes_one_run_per_iteration() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let summaries =
        run_training_iterations(&f.ctx(&PriorBooster), &["NGDC", "SIO"], "all", 3).unwrap();

    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|s| s.model_trained));
    for run_id in ["0", "1", "2"] {
        assert!(f.store.model_path("all", run_id).exists());
        assert!(f.store.load_predictions("all", "all", run_id).is_ok());
    }
    assert!(!f.store.model_path("all", "3").exists());
}

#[test]
fn test_skipped_shard_rows_stay_out_of_training_and_scores() {
    let f = Fixture::new(50, &ten_cruise_regions());
    let locator = ShardLocator::from_config(&f.config);
    // c9 holds 103 records: shards of 50, 50, 3.
    std::fs::remove_file(locator.shard_path("SIO", "c9", 0)).unwrap();
    let ctx = f.ctx(&PriorBooster);

    let summary = run_training(&ctx, &["SIO"], "SIO", "0").unwrap();
    assert_eq!(summary.records.iter().sum::<usize>(), 10 * 40 + 7 * 45 - 50);

    run_testing(&ctx, "SIO", &["SIO"], "0").unwrap();
    let scored = f.store.load_predictions("SIO", "SIO", "0").unwrap();
    assert_eq!(scored.labels.len(), 10 * 40 + 7 * 45 - 50);

    let log = std::fs::read_to_string(f.config.base_dir.join("test_job.log")).unwrap();
    assert!(log.contains("excluded zero-filled records, 50"));
}

#[test]
fn test_cv_folds_leave_out_skipped_shard_rows() {
    let mut f = Fixture::new(50, &ten_cruise_regions());
    f.config.folds = 5;
    let locator = ShardLocator::from_config(&f.config);
    std::fs::remove_file(locator.shard_path("NGDC", "c9", 1)).unwrap();
    let summaries = run_cv_folds(&f.ctx(&PriorBooster), &["NGDC", "SIO"], "all").unwrap();

    let mut scored = 0;
    for s in &summaries {
        let predictions = f.store.load_predictions("all", "all", &s.fold.index.to_string());
        scored += predictions.unwrap().labels.len();
    }
    assert_eq!(scored, 2 * (10 * 40 + 7 * 45) - 50);

    let log = std::fs::read_to_string(f.config.base_dir.join("test_job.log")).unwrap();
    assert!(log.contains("zero-filled records, 50"));
}

#[test]
fn test_testing_without_model_fails() {
    let f = Fixture::new(50, &ten_cruise_regions());
    assert!(run_testing(&f.ctx(&PriorBooster), "SIO", &["SIO"], "9").is_err());
}

#[test]
fn test_unknown_region_fails_job() {
    let f = Fixture::new(50, &ten_cruise_regions());
    assert!(matches!(
        run_training(&f.ctx(&PriorBooster), &["ATLANTIS"], "ATLANTIS", "0"),
        Err(Error::UnknownRegion(_))
    ));
}

#[test]
fn test_cv_folds_hold_out_every_cruise_once() {
    let mut f = Fixture::new(50, &ten_cruise_regions());
    f.config.folds = 5;
    let summaries = run_cv_folds(&f.ctx(&PriorBooster), &["NGDC", "SIO"], "all").unwrap();

    assert_eq!(summaries.len(), 5);
    assert_eq!(summaries[0].fold.start, 0);
    for pair in summaries.windows(2) {
        assert_eq!(pair[0].fold.end, pair[1].fold.start);
    }
    let held: u64 = summaries.iter().map(|s| s.fold.record_count).sum();
    assert_eq!(held, 2 * (10 * 40 + 7 * 45));
    for s in &summaries {
        assert!(s.model_trained);
        assert_eq!(s.artifacts.len(), 3);
        let scored = f.store.load_predictions("all", "all", &s.fold.index.to_string()).unwrap();
        assert_eq!(scored.labels.len() as u64, s.fold.record_count);
    }
}

#[test]
fn test_cv_folds_reject_too_many_folds() {
    let mut f = Fixture::new(50, &[("NGDC", "a", 10), ("NGDC", "b", 10)]);
    f.config.folds = 3;
    assert!(matches!(
        run_cv_folds(&f.ctx(&PriorBooster), &["NGDC"], "NGDC"),
        Err(Error::InvalidFoldCount { k: 3, units: 2 })
    ));
}

#[test]
fn test_booster_cv_persists_fold_metrics() {
    let mut f = Fixture::new(50, &ten_cruise_regions());
    f.config.folds = 4;
    let metrics = run_cv(&f.ctx(&PriorBooster), &["NGDC", "SIO"], "all").unwrap();
    assert_eq!(metrics.len(), 4);
    assert!(f.config.base_dir.join("cv_results_all_0.json").exists());

    assert!(run_cv(&f.ctx(&BrokenBooster), &["NGDC"], "NGDC").is_err());
}

#[tokio::test]
async fn test_orchestrated_jobs_isolate_failures() {
    let f = Arc::new(Fixture::new(50, &ten_cruise_regions()));
    let jobs = ["NGDC", "ATLANTIS", "SIO"]
        .into_iter()
        .map(|region| {
            let f = Arc::clone(&f);
            Job::new(format!("training_log_{region}"), move || {
                run_training(&f.ctx(&PriorBooster), &[region], region, "0").map(|s| s.model_trained)
            })
        })
        .collect();
    let report = run_jobs(jobs, 2).await;

    assert_eq!(report.succeeded(), 2);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "training_log_ATLANTIS");
    assert!(f.store.model_path("NGDC", "0").exists());
    assert!(f.store.model_path("SIO", "0").exists());
}
