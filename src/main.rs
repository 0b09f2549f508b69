//! `bathyshard` command-line runner.
//!
//! ```text
//! bathyshard train --config run.json
//! bathyshard test-cross --config run.json --run-id 0
//! bathyshard train-random --config run.json --iterations 5
//! ```

use anyhow::{bail, Context};
use bathyshard::booster::PriorBooster;
use bathyshard::config::Config;
use bathyshard::experiment::ArtifactStore;
use bathyshard::inventory::{load_inventory, Inventory};
use bathyshard::logging::{init_tracing, JobLog};
use bathyshard::orchestrator::{run_jobs, Job, JobOutcome};
use bathyshard::pipeline::{
    run_cv, run_cv_folds, run_testing, run_training, run_training_iterations, JobContext,
    TrainingSummary,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "bathyshard",
    about = "Partition sharded bathymetry data and train per-region models"
)]
struct Args {
    /// Task to run
    #[arg(value_enum)]
    task: Task,

    /// JSON run configuration
    #[arg(long)]
    config: PathBuf,

    /// Run id used to name (and look up) artifacts
    #[arg(long, default_value = "0")]
    run_id: String,

    /// Train/test cycles of `train-random`, with run ids `0..N`
    #[arg(long, default_value_t = 1)]
    iterations: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Task {
    /// One training job per region
    Train,
    /// A single training job over every region
    TrainAll,
    /// Score each region with its own model
    TestSelf,
    /// Score every region with each region's model
    TestCross,
    /// Score every region with the model trained on all regions
    TestAll,
    /// Repeated training over every region, one run id per iteration
    TrainRandom,
    /// Booster-driven cross validation over every region
    Cv,
    /// Cruise-level k-fold cross validation over every region
    CvFolds,
}

#[derive(Clone)]
struct Shared {
    config: Arc<Config>,
    inventory: Arc<Inventory>,
    store: ArtifactStore,
    booster: PriorBooster,
}

impl Shared {
    fn job<F>(&self, name: String, body: F) -> Job<String>
    where
        F: FnOnce(&JobContext<'_, PriorBooster>) -> bathyshard::Result<String> + Send + 'static,
    {
        let shared = self.clone();
        let log_name = name.clone();
        Job::new(name, move || {
            let log = JobLog::open(&shared.config.base_dir, &log_name)?;
            let ctx = JobContext {
                config: &shared.config,
                inventory: &shared.inventory,
                booster: &shared.booster,
                store: &shared.store,
                log: &log,
            };
            body(&ctx)
        })
    }
}

fn describe(label: &str, summary: &TrainingSummary) -> String {
    format!(
        "{label}: {:?} records, model trained: {}",
        summary.records, summary.model_trained
    )
}

fn build_jobs(args: &Args, shared: &Shared, regions: &[String]) -> Vec<Job<String>> {
    let all = regions.to_vec();
    let run_id = args.run_id.as_str();
    match args.task {
        Task::Train => regions
            .iter()
            .map(|region| {
                let (region, run_id) = (region.clone(), run_id.to_string());
                shared.job(format!("training_log_{region}"), move |ctx| {
                    let summary = run_training(ctx, &[region.as_str()], &region, &run_id)?;
                    Ok(describe(&region, &summary))
                })
            })
            .collect(),
        Task::TrainAll => {
            let run_id = run_id.to_string();
            vec![shared.job("training_log_all".to_string(), move |ctx| {
                let summary = run_training(ctx, &all, "all", &run_id)?;
                Ok(describe("all", &summary))
            })]
        }
        Task::TrainRandom => {
            let iterations = args.iterations;
            vec![shared.job("training_log_all".to_string(), move |ctx| {
                let summaries = run_training_iterations(ctx, &all, "all", iterations)?;
                let trained = summaries.iter().filter(|s| s.model_trained).count();
                Ok(format!("all: {trained} of {iterations} iterations trained"))
            })]
        }
        Task::TestSelf | Task::TestCross => regions
            .iter()
            .map(|region| {
                let (region, run_id) = (region.clone(), run_id.to_string());
                let targets = if matches!(args.task, Task::TestSelf) {
                    vec![region.clone()]
                } else {
                    all.clone()
                };
                shared.job(format!("testing_log_{region}"), move |ctx| {
                    let written = run_testing(ctx, &region, &targets, &run_id)?;
                    Ok(format!("{region}: {} prediction files", written.len()))
                })
            })
            .collect(),
        Task::TestAll => {
            let run_id = run_id.to_string();
            vec![shared.job("testing_log_all".to_string(), move |ctx| {
                let written = run_testing(ctx, "all", &all, &run_id)?;
                Ok(format!("all: {} prediction files", written.len()))
            })]
        }
        Task::Cv => vec![shared.job("cv_log_all".to_string(), move |ctx| {
            let folds = run_cv(ctx, &all, "all")?;
            Ok(format!("all: {} folds evaluated", folds.len()))
        })],
        Task::CvFolds => vec![shared.job("cv_folds_log_all".to_string(), move |ctx| {
            let folds = run_cv_folds(ctx, &all, "all")?;
            let trained = folds.iter().filter(|f| f.model_trained).count();
            Ok(format!("all: {trained} of {} folds trained", folds.len()))
        })],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Config::from_json_file(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let store = ArtifactStore::new(&config.base_dir);
    store
        .init()
        .with_context(|| format!("failed to prepare {}", config.base_dir.display()))?;
    let inventory = load_inventory(&config.manifest_path)
        .with_context(|| format!("failed to read manifest {}", config.manifest_path.display()))?;

    let regions: Vec<String> = if config.regions.is_empty() {
        inventory.regions().map(str::to_string).collect()
    } else {
        config.regions.clone()
    };
    tracing::info!(
        task = ?args.task,
        regions = regions.len(),
        workers = config.workers,
        "starting run"
    );

    let workers = config.workers;
    let shared = Shared {
        config: Arc::new(config),
        inventory: Arc::new(inventory),
        store,
        booster: PriorBooster,
    };
    let jobs = build_jobs(&args, &shared, &regions);
    let report = run_jobs(jobs, workers).await;

    for result in &report.results {
        match &result.outcome {
            JobOutcome::Succeeded(summary) => tracing::info!(job = result.run.job(), "{summary}"),
            JobOutcome::Failed { reason } => tracing::error!(job = result.run.job(), "{reason}"),
        }
    }
    if !report.is_complete() {
        bail!(
            "{} of {} jobs failed",
            report.results.len() - report.succeeded(),
            report.results.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_repeated_training() {
        let args = Args::parse_from([
            "bathyshard",
            "train-random",
            "--config",
            "run.json",
            "--iterations",
            "3",
        ]);
        assert!(matches!(args.task, Task::TrainRandom));
        assert_eq!(args.iterations, 3);
    }

    #[test]
    fn test_parses_all_model_testing() {
        let args = Args::parse_from(["bathyshard", "test-all", "--config", "run.json"]);
        assert!(matches!(args.task, Task::TestAll));
        assert_eq!(args.run_id, "0");
        assert_eq!(args.iterations, 1);
    }
}
