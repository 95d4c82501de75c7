use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Raw train/test split produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIngestionArtifact {
    /// Full copy of the exported records.
    pub feature_store_file_path: PathBuf,
    /// Training split (CSV with header).
    pub trained_file_path: PathBuf,
    /// Held-out split (CSV with header).
    pub test_file_path: PathBuf,
}

/// Validation verdict plus the report backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValidationArtifact {
    /// True when every schema check passed.
    pub validation_status: bool,
    /// Human-readable summary of failed checks (empty on success).
    pub message: String,
    /// JSON report written by the validation stage.
    pub validation_report_file_path: PathBuf,
}

/// Numeric, model-ready data. Matrices carry the label as their last column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransformationArtifact {
    /// Fitted preprocessing transformer.
    pub transformed_object_file_path: PathBuf,
    /// Transformed training matrix.
    pub transformed_train_file_path: PathBuf,
    /// Transformed test matrix.
    pub transformed_test_file_path: PathBuf,
}

/// Held-out evaluation summary. Accuracy is deliberately absent; it only feeds the gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetricArtifact {
    /// F1 score of the positive class.
    #[serde(rename = "f1_score")]
    pub f1: f64,
    /// Precision of the positive class.
    #[serde(rename = "precision_score")]
    pub precision: f64,
    /// Recall of the positive class.
    #[serde(rename = "recall_score")]
    pub recall: f64,
}

/// Terminal output of a successful, promoted training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerArtifact {
    /// Location of the persisted prediction unit.
    pub trained_model_file_path: PathBuf,
    /// Metrics measured on the held-out split.
    pub metric_artifact: ClassificationMetricArtifact,
}

impl fmt::Display for ModelTrainerArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={} f1={:.4} precision={:.4} recall={:.4}",
            self.trained_model_file_path.display(),
            self.metric_artifact.f1,
            self.metric_artifact.precision,
            self.metric_artifact.recall
        )
    }
}
