//! Artifact Store - deterministic on-disk layout for models and predictions
//!
//! ```text
//! <base_dir>/runtime_models/<region>_model_<run_id>.json   serialized model
//! <base_dir>/runtime_models/<region>_model_<run_id>.txt    text export
//! <base_dir>/runtime_scores/model_<m>_test_<t>_scores_<run_id>.parquet
//! ```
//!
//! Writes overwrite. There is no locking: run ids are unique per job, so
//! concurrent jobs never share a path.

use super::{ArtifactKind, ArtifactRecord};
use crate::booster::{FoldMetrics, TrainedModel};
use crate::storage::shard::write_batch;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::{s, Array2, ArrayView1, ArrayView2};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Models directory name
pub const MODEL_DIR: &str = "runtime_models";
/// Predictions directory name
pub const SCORES_DIR: &str = "runtime_scores";
/// Leading feature columns kept with predictions (position/depth prefix)
pub const PREDICTION_PREFIX_COLUMNS: usize = 4;

/// Predictions read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionArtifact {
    /// First feature columns of each scored record
    pub features: Array2<f64>,
    /// True 0/1 labels
    pub labels: Vec<i32>,
    /// Clipped scores
    pub scores: Vec<f64>,
}

/// Filesystem store rooted at a job's base directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the model and score directories. Existing contents are untouched.
    ///
    /// # Errors
    /// Returns error if a directory cannot be created.
    pub fn init(&self) -> Result<()> {
        for dir in [MODEL_DIR, SCORES_DIR] {
            std::fs::create_dir_all(self.base_dir.join(dir))?;
        }
        Ok(())
    }

    /// Serialized model path.
    #[must_use]
    pub fn model_path(&self, region: &str, run_id: &str) -> PathBuf {
        self.base_dir
            .join(MODEL_DIR)
            .join(format!("{region}_model_{run_id}.json"))
    }

    /// Text export path.
    #[must_use]
    pub fn model_dump_path(&self, region: &str, run_id: &str) -> PathBuf {
        self.model_path(region, run_id).with_extension("txt")
    }

    /// Predictions path.
    #[must_use]
    pub fn prediction_path(&self, model_region: &str, test_region: &str, run_id: &str) -> PathBuf {
        self.base_dir
            .join(SCORES_DIR)
            .join(format!("model_{model_region}_test_{test_region}_scores_{run_id}.parquet"))
    }

    /// Persist a model and its text export.
    ///
    /// When training produced no model nothing is written and `Ok(None)` is
    /// returned.
    ///
    /// # Errors
    /// Returns error if serialization or either write fails.
    pub fn persist_model<M: TrainedModel>(
        &self,
        region: &str,
        model: Option<&M>,
        run_id: &str,
    ) -> Result<Option<[ArtifactRecord; 2]>> {
        let Some(model) = model else {
            tracing::warn!(region, run_id, "no model produced, skipping model artifacts");
            return Ok(None);
        };
        let model_path = self.model_path(region, run_id);
        let dump_path = self.model_dump_path(region, run_id);
        std::fs::write(&model_path, serde_json::to_vec(model)?)?;
        std::fs::write(&dump_path, model.dump_text())?;
        tracing::info!(path = %model_path.display(), "model persisted");

        Ok(Some([
            record(region, None, run_id, ArtifactKind::Model, model_path)?,
            record(region, None, run_id, ArtifactKind::ModelDump, dump_path)?,
        ]))
    }

    /// Load a model written by [`ArtifactStore::persist_model`].
    ///
    /// # Errors
    /// Returns error if the file is missing or does not deserialize.
    pub fn load_model<M: TrainedModel>(&self, region: &str, run_id: &str) -> Result<M> {
        let path = self.model_path(region, run_id);
        let bytes = std::fs::read(&path)
            .map_err(|e| {
                Error::StorageError(format!("Failed to read model {}: {e}", path.display()))
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist scores with the labels and leading feature columns of the
    /// scored records.
    ///
    /// # Errors
    /// Returns error if lengths disagree or the write fails.
    pub fn persist_predictions(
        &self,
        model_region: &str,
        test_region: &str,
        features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
        scores: &[f64],
        run_id: &str,
    ) -> Result<ArtifactRecord> {
        let rows = features.nrows();
        if labels.len() != rows || scores.len() != rows {
            return Err(Error::StorageError(format!(
                "Prediction length mismatch: {rows} rows, {} labels, {} scores",
                labels.len(),
                scores.len()
            )));
        }
        let prefix = features.slice(s![.., ..features.ncols().min(PREDICTION_PREFIX_COLUMNS)]);

        let mut fields = Vec::with_capacity(prefix.ncols() + 2);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(prefix.ncols() + 2);
        for c in 0..prefix.ncols() {
            fields.push(Field::new(format!("f{c}"), DataType::Float64, false));
            let column = prefix.column(c);
            let values = column.iter().copied();
            columns.push(Arc::new(Float64Array::from_iter_values(values)));
        }
        fields.push(Field::new("label", DataType::Int32, false));
        #[allow(clippy::cast_possible_truncation)]
        let label_values: Vec<i32> = labels.iter().map(|&l| l as i32).collect();
        columns.push(Arc::new(Int32Array::from(label_values)));
        fields.push(Field::new("score", DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(scores.to_vec())));

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        let path = self.prediction_path(model_region, test_region, run_id);
        write_batch(&path, &batch)?;
        tracing::info!(path = %path.display(), rows, "predictions persisted");

        record(
            model_region,
            Some(test_region.to_string()),
            run_id,
            ArtifactKind::Predictions,
            path,
        )
    }

    /// Load predictions written by [`ArtifactStore::persist_predictions`].
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed.
    pub fn load_predictions(
        &self,
        model_region: &str,
        test_region: &str,
        run_id: &str,
    ) -> Result<PredictionArtifact> {
        let path = self.prediction_path(model_region, test_region, run_id);
        load_prediction_file(&path)
    }

    /// Persist cross-validation metrics as JSON under the base directory.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn persist_cv_results(
        &self,
        region: &str,
        results: &[FoldMetrics],
        run_id: &str,
    ) -> Result<ArtifactRecord> {
        let path = self.base_dir.join(format!("cv_results_{region}_{run_id}.json"));
        std::fs::write(&path, serde_json::to_vec_pretty(results)?)?;
        record(region, None, run_id, ArtifactKind::CvResults, path)
    }
}

fn record(
    region: &str,
    test_region: Option<String>,
    run_id: &str,
    kind: ArtifactKind,
    path: PathBuf,
) -> Result<ArtifactRecord> {
    let size = std::fs::metadata(&path)?.len();
    Ok(ArtifactRecord::new(region, test_region, run_id, kind, path, size))
}

fn load_prediction_file(path: &Path) -> Result<PredictionArtifact> {
    let file = File::open(path)
        .map_err(|e| {
            Error::StorageError(format!("Failed to open predictions {}: {e}", path.display()))
        })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut prefix: Vec<Vec<f64>> = Vec::new();
    let mut labels = Vec::new();
    let mut scores = Vec::new();
    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();
        let width = schema.fields().len().saturating_sub(2);
        prefix.resize(width, Vec::new());
        for (c, column) in prefix.iter_mut().enumerate() {
            column.extend_from_slice(f64_column(&batch, c)?.values());
        }
        let label_col = batch
            .column(width)
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| Error::StorageError("label column is not Int32".to_string()))?;
        labels.extend_from_slice(label_col.values());
        scores.extend_from_slice(f64_column(&batch, width + 1)?.values());
    }

    let rows = labels.len();
    let features = Array2::from_shape_fn((rows, prefix.len()), |(r, c)| prefix[c][r]);
    Ok(PredictionArtifact {
        features,
        labels,
        scores,
    })
}

fn f64_column(batch: &RecordBatch, index: usize) -> Result<&Float64Array> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::StorageError(format!("column {index} is not Float64")))
}
