use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ClassificationMetricArtifact;

/// Inputs the metric functions cannot score.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    /// No samples to score.
    #[error("cannot score an empty prediction set")]
    Empty,
    /// Truth and prediction vectors disagree in length.
    #[error("{truth} labels but {predicted} predictions")]
    LengthMismatch {
        /// Ground-truth count.
        truth: usize,
        /// Prediction count.
        predicted: usize,
    },
}

/// Binary confusion counts with class `1` as positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Predicted 1, actual 1.
    pub true_positives: usize,
    /// Predicted 1, actual 0.
    pub false_positives: usize,
    /// Predicted 0, actual 0.
    pub true_negatives: usize,
    /// Predicted 0, actual 1.
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Tallies predictions against ground truth. Any value other than `1.0` counts as negative.
    pub fn tally(
        truth: ArrayView1<'_, f64>,
        predicted: ArrayView1<'_, f64>,
    ) -> Result<Self, MetricError> {
        if truth.len() != predicted.len() {
            return Err(MetricError::LengthMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        if truth.is_empty() {
            return Err(MetricError::Empty);
        }
        let mut counts = Self::default();
        for (&actual, &guess) in truth.iter().zip(predicted.iter()) {
            match (actual == 1.0, guess == 1.0) {
                (true, true) => counts.true_positives += 1,
                (false, true) => counts.false_positives += 1,
                (false, false) => counts.true_negatives += 1,
                (true, false) => counts.false_negatives += 1,
            }
        }
        Ok(counts)
    }

    /// Sample count.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

/// Accuracy, precision, recall and F1 for one prediction set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Fraction of correct predictions.
    pub accuracy: f64,
    /// `tp / (tp + fp)`, or `0.0` with no predicted positives.
    pub precision: f64,
    /// `tp / (tp + fn)`, or `0.0` with no actual positives.
    pub recall: f64,
    /// Harmonic mean of precision and recall, or `0.0` when both are zero.
    pub f1: f64,
}

impl ClassificationReport {
    /// Scores `predicted` against `truth`.
    pub fn score(
        truth: ArrayView1<'_, f64>,
        predicted: ArrayView1<'_, f64>,
    ) -> Result<Self, MetricError> {
        Ok(Self::from_confusion(&ConfusionMatrix::tally(truth, predicted)?))
    }

    /// Derives the report from raw counts.
    #[must_use]
    pub fn from_confusion(counts: &ConfusionMatrix) -> Self {
        let tp = counts.true_positives as f64;
        let precision = ratio(tp, tp + counts.false_positives as f64);
        let recall = ratio(tp, tp + counts.false_negatives as f64);
        Self {
            accuracy: ratio(
                (counts.true_positives + counts.true_negatives) as f64,
                counts.total() as f64,
            ),
            precision,
            recall,
            f1: ratio(2.0 * precision * recall, precision + recall),
        }
    }

    /// The subset persisted with a promoted model.
    #[must_use]
    pub const fn metric_artifact(&self) -> ClassificationMetricArtifact {
        ClassificationMetricArtifact {
            f1: self.f1,
            precision: self.precision,
            recall: self.recall,
        }
    }
}

/// Fraction of predictions equal to the truth.
pub fn accuracy_score(
    truth: ArrayView1<'_, f64>,
    predicted: ArrayView1<'_, f64>,
) -> Result<f64, MetricError> {
    ClassificationReport::score(truth, predicted).map(|report| report.accuracy)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
