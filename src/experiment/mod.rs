//! Persistence layer: runtime artifacts and job run records.
//!
//! ```text
//! RunRecord (1 per job) ──< ArtifactRecord (N)
//!                            ├─ Model / ModelDump  (region, run_id)
//!                            ├─ Predictions        (model_region, test_region, run_id)
//!                            └─ CvResults          (region, run_id)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bathyshard::experiment::ArtifactStore;
//!
//! let store = ArtifactStore::new("/work");
//! store.init()?;
//! let scores = store.load_predictions("NGDC", "SIO", "0")?;
//! println!("{} scored records", scores.labels.len());
//! # Ok::<(), bathyshard::Error>(())
//! ```

mod artifact_record;
mod run_record;
mod store;

pub use artifact_record::{ArtifactKind, ArtifactRecord};
pub use run_record::{RunRecord, RunStatus};
pub use store::{
    ArtifactStore, PredictionArtifact, MODEL_DIR, PREDICTION_PREFIX_COLUMNS, SCORES_DIR,
};
