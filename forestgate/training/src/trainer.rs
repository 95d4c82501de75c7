//! Model trainer stage: fit, evaluate, gate, and persist the prediction unit.
//!
//! Rejection is an ordinary outcome ([`TrainerOutcome::Rejected`]), not an
//! error. Only genuine failures (bad matrices, unreadable artifacts, a failed
//! write) come back as [`TrainerError`].

use std::path::Path;

use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    artifact::{ClassificationMetricArtifact, DataTransformationArtifact, ModelTrainerArtifact},
    config::{GateSplit, TrainingConfig},
    dataset::{DatasetError, LabeledMatrix},
    estimator::{EstimatorError, PredictionUnit, Preprocessor},
    forest::{ForestError, ForestParams, RandomForestClassifier},
    gate::{GateDecision, PromotionGate},
    metrics::{accuracy_score, ClassificationReport, MetricError},
    stages::{Stage, StageName},
    store::{ArtifactStore, StoreError},
    telemetry::PipelineTelemetry,
};

/// Why fitting or scoring could not complete.
#[derive(Debug, Error)]
pub enum TrainingFailure {
    /// A matrix lacks room for features plus a label.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// A split has no rows.
    #[error("{split} matrix has no rows")]
    EmptySplit {
        /// `train` or `test`.
        split: &'static str,
    },
    /// Train and test disagree on the number of features.
    #[error("train has {train} features but test has {test}")]
    WidthMismatch {
        /// Training width.
        train: usize,
        /// Test width.
        test: usize,
    },
    /// A feature value that is NaN or infinite.
    #[error("{split} feature at row {row}, column {col} is not a finite number")]
    NonFiniteFeature {
        /// `train` or `test`.
        split: &'static str,
        /// Offending row.
        row: usize,
        /// Offending feature column.
        col: usize,
    },
    /// A test label outside `{0, 1}`.
    #[error("test label {value} at row {row} is not 0 or 1")]
    NonBinaryTestLabel {
        /// Offending row.
        row: usize,
        /// Offending value.
        value: f64,
    },
    /// The forest refused the data.
    #[error(transparent)]
    Forest(#[from] ForestError),
    /// Scoring failed.
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Errors returned by [`ModelTrainer::run_stage`].
#[derive(Debug, Error)]
pub enum TrainerError {
    /// Fitting or scoring failed.
    #[error("training failed: {0}")]
    Training(#[from] TrainingFailure),
    /// Loading an input artifact failed.
    #[error("artifact store: {0}")]
    Store(#[from] StoreError),
    /// Persisting the prediction unit failed.
    #[error("persisting prediction unit: {0}")]
    Persist(#[from] EstimatorError),
}

/// Result of one trainer invocation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerOutcome {
    /// The model passed the gate and was persisted.
    Accepted(ModelTrainerArtifact),
    /// The model missed the threshold; nothing was written.
    Rejected {
        /// Measured gate accuracy.
        observed: f64,
        /// Configured threshold.
        required: f64,
    },
}

/// Trains the forest and guards the deployable model slot.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
    store: ArtifactStore,
    telemetry: PipelineTelemetry,
}

impl ModelTrainer {
    /// Creates a trainer with telemetry disabled.
    #[must_use]
    pub fn new(config: TrainingConfig, store: ArtifactStore) -> Self {
        Self {
            config,
            store,
            telemetry: PipelineTelemetry::disabled(StageName::ModelTrainer.as_str()),
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Trainer configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fits the forest on `train` and scores it on `test`.
    pub fn train_and_evaluate(
        &self,
        train: &LabeledMatrix,
        test: &LabeledMatrix,
    ) -> Result<(RandomForestClassifier, ClassificationMetricArtifact), TrainingFailure> {
        if train.is_empty() {
            return Err(TrainingFailure::EmptySplit { split: "train" });
        }
        if test.is_empty() {
            return Err(TrainingFailure::EmptySplit { split: "test" });
        }
        if train.n_features() != test.n_features() {
            return Err(TrainingFailure::WidthMismatch {
                train: train.n_features(),
                test: test.n_features(),
            });
        }
        for (split, data) in [("train", train), ("test", test)] {
            if let Some(((row, col), _)) = data
                .features()
                .indexed_iter()
                .find(|(_, value)| !value.is_finite())
            {
                return Err(TrainingFailure::NonFiniteFeature { split, row, col });
            }
        }
        if let Some((row, &value)) = test
            .labels()
            .iter()
            .enumerate()
            .find(|(_, value)| **value != 0.0 && **value != 1.0)
        {
            return Err(TrainingFailure::NonBinaryTestLabel { row, value });
        }

        let classifier = RandomForestClassifier::fit(train, ForestParams::from(&self.config))?;
        let predicted = classifier.predict(test.features())?;
        let report = ClassificationReport::score(test.labels(), predicted.view())?;
        self.telemetry.note(
            LogLevel::Info,
            "model evaluated on test split",
            json!({
                "trees": classifier.trees().len(),
                "criterion": self.config.split_criterion.to_string(),
                "accuracy": report.accuracy,
                "precision": report.precision,
                "recall": report.recall,
                "f1": report.f1,
            }),
        );
        Ok((classifier, report.metric_artifact()))
    }

    /// Runs the full trainer stage against a transformation artifact.
    pub fn run_stage(
        &self,
        artifact: &DataTransformationArtifact,
    ) -> Result<TrainerOutcome, TrainerError> {
        let train = self.load_split(&artifact.transformed_train_file_path)?;
        let test = self.load_split(&artifact.transformed_test_file_path)?;
        let preprocessor: Preprocessor = self
            .store
            .load_object(&artifact.transformed_object_file_path)?;

        let (classifier, metrics) = self.train_and_evaluate(&train, &test)?;

        let gate_data = match self.config.gate_split {
            GateSplit::Train => &train,
            GateSplit::Test => &test,
        };
        let gate_predictions = classifier
            .predict(gate_data.features())
            .map_err(TrainingFailure::from)?;
        let observed = accuracy_score(gate_data.labels(), gate_predictions.view())
            .map_err(TrainingFailure::from)?;

        let gate = PromotionGate::new(self.config.expected_accuracy_threshold);
        let decision = gate.evaluate(observed);
        self.telemetry.note(
            if decision.passed() {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            "promotion gate evaluated",
            json!({ "decision": decision, "gate_split": self.config.gate_split }),
        );
        match decision {
            GateDecision::Reject { observed, required } => {
                Ok(TrainerOutcome::Rejected { observed, required })
            }
            GateDecision::Pass { observed } => {
                let path = self.config.output_model_path.clone();
                PredictionUnit::new(preprocessor, classifier).persist(&self.store, &path)?;
                self.telemetry.note(
                    LogLevel::Info,
                    "model promoted",
                    json!({
                        "observed": observed,
                        "required": gate.required(),
                        "path": path.display().to_string(),
                    }),
                );
                Ok(TrainerOutcome::Accepted(ModelTrainerArtifact {
                    trained_model_file_path: path,
                    metric_artifact: metrics,
                }))
            }
        }
    }

    fn load_split(&self, path: &Path) -> Result<LabeledMatrix, TrainerError> {
        let raw = self.store.load_matrix(path)?;
        Ok(LabeledMatrix::from_trailing_label(&raw).map_err(TrainingFailure::from)?)
    }
}

impl Stage<DataTransformationArtifact> for ModelTrainer {
    type Output = TrainerOutcome;

    fn name(&self) -> StageName {
        StageName::ModelTrainer
    }

    fn run(&self, input: &DataTransformationArtifact) -> anyhow::Result<TrainerOutcome> {
        Ok(self.run_stage(input)?)
    }
}
