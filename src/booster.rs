//! Training capability boundary
//!
//! Gradient boosting itself is an external collaborator reached only through
//! [`Booster`]'s `train` / `predict` / `cv`. This module adds the call-site
//! policy around it: failures are logged and become `None`, scores are
//! clipped away from 0 and 1, and every test call logs one `eval` line
//! (`eval, model_region, data_region, model_size, loss, auprc, auroc, accuracy`).

use crate::logging::JobLog;
use crate::{Error, Result};
use ndarray::{ArrayView1, ArrayView2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lower/upper clip applied to predicted scores before scoring
pub const SCORE_EPSILON: f64 = 1e-15;

/// Header matching the `eval` lines written by [`test_logged`]
pub const EVAL_HEADER: &str =
    "eval, model_region, data_region, model_size, loss, auprc, auroc, accuracy";

/// A trained, persistable model.
pub trait TrainedModel: Serialize + DeserializeOwned + Send {
    /// Plain-text export for external tooling
    fn dump_text(&self) -> String;
    /// Number of trees (reported as model size)
    fn num_trees(&self) -> usize;
}

/// Validation data handed to [`Booster::train`]
pub type ValidSet<'a> = (ArrayView2<'a, f64>, ArrayView1<'a, f64>);

/// Metrics of one cross-validation fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    /// Fold number
    pub fold: usize,
    /// Metric name → value
    pub metrics: BTreeMap<String, f64>,
}

/// Opaque binary-classifier training capability.
pub trait Booster: Send + Sync {
    /// Model produced by training
    type Model: TrainedModel;

    /// Train on `features`/`labels`, optionally watching a validation set.
    ///
    /// # Errors
    /// Any training failure.
    fn train(
        &self,
        params: &serde_json::Value,
        features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
        valid: Option<ValidSet<'_>>,
    ) -> Result<Self::Model>;

    /// Raw scores in `[0, 1]`, one per row.
    ///
    /// # Errors
    /// Any prediction failure.
    fn predict(&self, model: &Self::Model, features: ArrayView2<'_, f64>) -> Result<Vec<f64>>;

    /// Library-driven cross validation over a dense `(rows, width + 1)` array
    /// whose first column is the label.
    ///
    /// # Errors
    /// Any training failure.
    fn cv(
        &self,
        params: &serde_json::Value,
        data: ArrayView2<'_, f64>,
        n_folds: usize,
    ) -> Result<Vec<FoldMetrics>>;
}

/// Scores of one test call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    /// Mean binary log loss
    pub loss: f64,
    /// Area under the precision/recall curve (positive class = 1)
    pub auprc: f64,
    /// Area under the ROC curve
    pub auroc: f64,
    /// Accuracy at threshold 0.5
    pub accuracy: f64,
}

impl EvalMetrics {
    /// Compute metrics for 0/1 `labels` and clipped `scores`.
    ///
    /// Curve areas are `NaN` when a class is absent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(labels: &[f64], scores: &[f64]) -> Self {
        let n = labels.len().min(scores.len());
        if n == 0 {
            return Self {
                loss: f64::NAN,
                auprc: f64::NAN,
                auroc: f64::NAN,
                accuracy: f64::NAN,
            };
        }
        let pairs: Vec<(f64, bool)> = scores[..n]
            .iter()
            .zip(&labels[..n])
            .map(|(&s, &l)| (s, l > 0.5))
            .collect();

        let loss = pairs
            .iter()
            .map(|&(s, pos)| if pos { -s.ln() } else { -(1.0 - s).ln() })
            .sum::<f64>()
            / n as f64;
        let correct = pairs.iter().filter(|&&(s, pos)| (s > 0.5) == pos).count();
        let (auprc, auroc) = curve_areas(pairs);

        Self {
            loss,
            auprc,
            auroc,
            accuracy: correct as f64 / n as f64,
        }
    }
}

/// Trapezoid area of `(x, y)` points ordered by `x`.
fn trapezoid(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[1].1 + w[0].1) / 2.0)
        .sum()
}

#[allow(clippy::cast_precision_loss)]
fn curve_areas(mut pairs: Vec<(f64, bool)>) -> (f64, f64) {
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    let positives = pairs.iter().filter(|p| p.1).count() as f64;
    let negatives = pairs.len() as f64 - positives;

    // Cumulative (fp, tp) at each distinct threshold, highest first.
    let mut counts = Vec::new();
    let (mut tp, mut fp) = (0.0, 0.0);
    for (i, &(score, pos)) in pairs.iter().enumerate() {
        if pos {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        if pairs.get(i + 1).map_or(true, |next| next.0 != score) {
            counts.push((fp, tp));
        }
    }

    let auroc = if positives == 0.0 || negatives == 0.0 {
        f64::NAN
    } else {
        let mut roc = vec![(0.0, 0.0)];
        roc.extend(counts.iter().map(|&(fp, tp)| (fp / negatives, tp / positives)));
        trapezoid(&roc)
    };

    let auprc = if positives == 0.0 {
        f64::NAN
    } else {
        let mut pr = vec![(0.0, 1.0)];
        for &(fp, tp) in &counts {
            pr.push((tp / positives, tp / (tp + fp)));
            if tp == positives {
                break;
            }
        }
        trapezoid(&pr)
    };
    (auprc, auroc)
}

/// Train, logging and swallowing failures.
pub fn train_logged<B: Booster>(
    booster: &B,
    params: &serde_json::Value,
    features: ArrayView2<'_, f64>,
    labels: ArrayView1<'_, f64>,
    valid: Option<ValidSet<'_>>,
    log: &JobLog,
) -> Option<B::Model> {
    log.log(format!("booster, start training, {} rows", features.nrows()));
    match booster.train(params, features, labels, valid) {
        Ok(model) => {
            log.log(format!("booster, finished training, {} trees", model.num_trees()));
            Some(model)
        }
        Err(e) => {
            log.log(format!("training failed, {e}"));
            None
        }
    }
}

/// Score `features`, clip, and log one `eval` line.
///
/// Returns `None` (after logging) if prediction fails.
pub fn test_logged<B: Booster>(
    booster: &B,
    model: &B::Model,
    model_region: &str,
    test_region: &str,
    features: ArrayView2<'_, f64>,
    labels: ArrayView1<'_, f64>,
    log: &JobLog,
) -> Option<Vec<f64>> {
    log.log("booster, start predicting");
    let scores = match booster.predict(model, features) {
        Ok(raw) => raw
            .into_iter()
            .map(|s| s.clamp(SCORE_EPSILON, 1.0 - SCORE_EPSILON))
            .collect::<Vec<_>>(),
        Err(e) => {
            log.log(format!("predicting failed, {e}"));
            return None;
        }
    };
    log.log("booster, finish predicting");

    let labels = labels.to_vec();
    let m = EvalMetrics::compute(&labels, &scores);
    log.log_fields([
        "eval".to_string(),
        model_region.to_string(),
        test_region.to_string(),
        model.num_trees().to_string(),
        m.loss.to_string(),
        m.auprc.to_string(),
        m.auroc.to_string(),
        m.accuracy.to_string(),
    ]);
    Some(scores)
}

/// Constant-rate baseline model: every record scores the training positive rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorModel {
    /// Fraction of good (1) labels seen in training
    pub positive_rate: f64,
}

impl TrainedModel for PriorModel {
    fn dump_text(&self) -> String {
        format!("prior\npositive_rate={}\n", self.positive_rate)
    }

    fn num_trees(&self) -> usize {
        0
    }
}

/// Baseline [`Booster`] used by the command-line runner and in tests.
///
/// It ignores `params` and features; real boosters plug in through the trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorBooster;

impl PriorBooster {
    #[allow(clippy::cast_precision_loss)]
    fn rate(labels: impl Iterator<Item = f64>) -> Result<f64> {
        let (n, positives) = labels.fold((0usize, 0.0), |(n, p), l| (n + 1, p + l));
        if n == 0 {
            return Err(Error::Training("no training records".to_string()));
        }
        Ok(positives / n as f64)
    }
}

impl Booster for PriorBooster {
    type Model = PriorModel;

    fn train(
        &self,
        _params: &serde_json::Value,
        _features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
        _valid: Option<ValidSet<'_>>,
    ) -> Result<PriorModel> {
        Ok(PriorModel {
            positive_rate: Self::rate(labels.iter().copied())?,
        })
    }

    fn predict(&self, model: &PriorModel, features: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        Ok(vec![model.positive_rate; features.nrows()])
    }

    fn cv(
        &self,
        _params: &serde_json::Value,
        data: ArrayView2<'_, f64>,
        n_folds: usize,
    ) -> Result<Vec<FoldMetrics>> {
        let rows = data.nrows();
        if n_folds == 0 || n_folds > rows {
            return Err(Error::InvalidFoldCount { k: n_folds, units: rows });
        }
        let labels = data.column(0);
        let fold_rows = rows / n_folds;
        (0..n_folds)
            .map(|fold| {
                let start = fold * fold_rows;
                let end = if fold + 1 == n_folds { rows } else { start + fold_rows };
                let train = labels
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i < start || *i >= end)
                    .map(|(_, &l)| l);
                let rate = Self::rate(train)?.clamp(SCORE_EPSILON, 1.0 - SCORE_EPSILON);
                let held: Vec<f64> = labels.iter().skip(start).take(end - start).copied().collect();
                let m = EvalMetrics::compute(&held, &vec![rate; held.len()]);
                let metrics = BTreeMap::from([
                    ("binary_logloss".to_string(), m.loss),
                    ("binary_error".to_string(), 1.0 - m.accuracy),
                ]);
                Ok(FoldMetrics { fold, metrics })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking() {
        let labels = [0.0, 0.0, 1.0, 1.0];
        let scores = [0.1, 0.2, 0.8, 0.9];
        let m = EvalMetrics::compute(&labels, &scores);
        assert!((m.auroc - 1.0).abs() < 1e-12);
        assert!((m.auprc - 1.0).abs() < 1e-12);
        assert!((m.accuracy - 1.0).abs() < 1e-12);
        assert!(m.loss > 0.0 && m.loss < 0.25);
    }

    #[test]
    fn test_inverted_ranking() {
        let labels = [1.0, 1.0, 0.0, 0.0];
        let scores = [0.1, 0.2, 0.8, 0.9];
        let m = EvalMetrics::compute(&labels, &scores);
        assert!(m.auroc.abs() < 1e-12);
        assert!(m.accuracy.abs() < 1e-12);
    }

    #[test]
    fn test_tied_scores_give_half_auc() {
        let labels = [0.0, 1.0, 0.0, 1.0];
        let scores = [0.5; 4];
        let m = EvalMetrics::compute(&labels, &scores);
        assert!((m.auroc - 0.5).abs() < 1e-12);
        assert!((m.auprc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_gives_nan_auroc() {
        let m = EvalMetrics::compute(&[1.0, 1.0], &[0.7, 0.9]);
        assert!(m.auroc.is_nan());
        assert!((m.auprc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_prior_booster_trains_rate() {
        let features = ndarray::Array2::<f64>::zeros((4, 2));
        let labels = ndarray::arr1(&[1.0, 1.0, 1.0, 0.0]);
        let model = PriorBooster
            .train(&serde_json::Value::Null, features.view(), labels.view(), None)
            .unwrap();
        assert!((model.positive_rate - 0.75).abs() < 1e-12);
        assert_eq!(PriorBooster.predict(&model, features.view()).unwrap(), vec![0.75; 4]);
    }

    #[test]
    fn test_prior_booster_rejects_empty_training_set() {
        let features = ndarray::Array2::<f64>::zeros((0, 2));
        let labels = ndarray::Array1::<f64>::zeros(0);
        let log = JobLog::tracing_only("test");
        let params = serde_json::Value::Null;
        let (features, labels) = (features.view(), labels.view());
        let model = train_logged(&PriorBooster, &params, features, labels, None, &log);
        assert!(model.is_none());
    }

    #[test]
    fn test_prior_booster_cv_reports_every_fold() {
        let data = ndarray::Array2::from_shape_fn((10, 3), |(r, c)| {
            if c == 0 {
                f64::from(u8::from(r % 2 == 0))
            } else {
                0.0
            }
        });
        let folds = PriorBooster.cv(&serde_json::Value::Null, data.view(), 3).unwrap();
        assert_eq!(folds.len(), 3);
        assert!(folds.iter().all(|f| f.metrics.contains_key("binary_logloss")));
        assert!(PriorBooster.cv(&serde_json::Value::Null, data.view(), 11).is_err());
    }

    #[test]
    fn test_logged_scores_are_clipped() {
        let model = PriorModel { positive_rate: 1.0 };
        let features = ndarray::Array2::<f64>::zeros((2, 1));
        let labels = ndarray::arr1(&[1.0, 0.0]);
        let log = JobLog::tracing_only("test");
        let scores =
            test_logged(&PriorBooster, &model, "a", "b", features.view(), labels.view(), &log)
                .unwrap();
        assert!(scores.iter().all(|&s| s < 1.0));
    }

    #[test]
    fn test_empty_input() {
        let m = EvalMetrics::compute(&[], &[]);
        assert!(m.loss.is_nan());
    }
}
