//! Sequences ingestion, validation, transformation and training.
//!
//! The run is strictly linear: each stage sees only the artifacts of the
//! stages before it, and the first failure ends the run. A new call to
//! [`TrainingPipeline::run_pipeline`] always starts again from
//! [`PipelineState::Idle`].

use std::{fmt, time::Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    artifact::{
        DataIngestionArtifact, DataTransformationArtifact, DataValidationArtifact,
        ModelTrainerArtifact,
    },
    config::PipelineConfig,
    stages::{DataIngestion, DataTransformation, DataValidation, Stage, StageName},
    store::ArtifactStore,
    telemetry::PipelineTelemetry,
    trainer::{ModelTrainer, TrainerOutcome},
};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not started.
    Idle,
    /// Ingestion running.
    Ingesting,
    /// Validation running.
    Validating,
    /// Transformation running.
    Transforming,
    /// Trainer running.
    Training,
    /// Model promoted.
    Done,
    /// Run ended without a promoted model.
    Failed,
}

impl PipelineState {
    /// True for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Why a run did not produce a model.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage failed; `source` carries the cause.
    #[error("{stage} stage failed")]
    Stage {
        /// Failing stage.
        stage: StageName,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
    /// The trained model missed the promotion threshold.
    #[error(
        "{} stage rejected the model: accuracy {observed:.4} is below the required {required:.4}",
        StageName::ModelTrainer
    )]
    ModelBelowThreshold {
        /// Measured accuracy.
        observed: f64,
        /// Configured threshold.
        required: f64,
    },
}

impl PipelineError {
    /// Stage the error is attributed to.
    #[must_use]
    pub const fn stage(&self) -> StageName {
        match self {
            Self::Stage { stage, .. } => *stage,
            Self::ModelBelowThreshold { .. } => StageName::ModelTrainer,
        }
    }
}

/// Bookkeeping for one invocation of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    states: Vec<PipelineState>,
    failed_stage: Option<StageName>,
}

impl PipelineRun {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            states: vec![PipelineState::Idle],
            failed_stage: None,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        self.states.push(state);
    }

    fn fail(&mut self, stage: StageName) {
        self.failed_stage = Some(stage);
        self.enter(PipelineState::Failed);
    }

    /// Unique id of the run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End time, once the run reached a terminal state.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Every state visited, in order, starting with `Idle`.
    #[must_use]
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    /// Latest state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    /// Stage that ended the run, when it failed.
    #[must_use]
    pub const fn failed_stage(&self) -> Option<StageName> {
        self.failed_stage
    }
}

/// Linear four-stage training pipeline.
pub struct TrainingPipeline<I, V, X, T> {
    ingestion: I,
    validation: V,
    transformation: X,
    trainer: T,
    halt_on_invalid_data: bool,
    telemetry: PipelineTelemetry,
    last_run: Mutex<Option<PipelineRun>>,
}

impl<I, V, X, T> fmt::Debug for TrainingPipeline<I, V, X, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingPipeline")
            .field("halt_on_invalid_data", &self.halt_on_invalid_data)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

/// Pipeline wired with the file-based stages and the forest trainer.
pub type DefaultPipeline =
    TrainingPipeline<DataIngestion, DataValidation, DataTransformation, ModelTrainer>;

impl DefaultPipeline {
    /// Builds every stage from one configuration document.
    #[must_use]
    pub fn from_config(config: &PipelineConfig, telemetry: &PipelineTelemetry) -> Self {
        let store = ArtifactStore::new();
        let layout = config.layout();
        let for_stage = |stage: StageName| telemetry.for_module(stage.as_str());
        Self::new(
            DataIngestion::new(config.ingestion.clone(), layout.clone(), store)
                .with_telemetry(for_stage(StageName::DataIngestion)),
            DataValidation::new(config.validation.clone(), layout.clone(), store)
                .with_telemetry(for_stage(StageName::DataValidation)),
            DataTransformation::new(config.transformation.clone(), layout, store)
                .with_telemetry(for_stage(StageName::DataTransformation)),
            ModelTrainer::new(config.trainer.clone(), store)
                .with_telemetry(for_stage(StageName::ModelTrainer)),
        )
        .with_halt_on_invalid_data(config.halt_on_invalid_data)
        .with_telemetry(telemetry.for_module("training_pipeline"))
    }
}

impl<I, V, X, T> TrainingPipeline<I, V, X, T>
where
    I: Stage<(), Output = DataIngestionArtifact>,
    V: Stage<DataIngestionArtifact, Output = DataValidationArtifact>,
    X: Stage<(DataIngestionArtifact, DataValidationArtifact), Output = DataTransformationArtifact>,
    T: Stage<DataTransformationArtifact, Output = TrainerOutcome>,
{
    /// Wires the four stages. Validation verdicts do not block by default.
    pub fn new(ingestion: I, validation: V, transformation: X, trainer: T) -> Self {
        Self {
            ingestion,
            validation,
            transformation,
            trainer,
            halt_on_invalid_data: false,
            telemetry: PipelineTelemetry::disabled("training_pipeline"),
            last_run: Mutex::new(None),
        }
    }

    /// Turns a negative validation verdict into a validation-stage failure.
    #[must_use]
    pub fn with_halt_on_invalid_data(mut self, halt: bool) -> Self {
        self.halt_on_invalid_data = halt;
        self
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Bookkeeping of the most recent run, if any.
    #[must_use]
    pub fn last_run(&self) -> Option<PipelineRun> {
        self.last_run.lock().clone()
    }

    /// Runs every stage in order and returns the promoted model's artifact.
    pub fn run_pipeline(&self) -> Result<ModelTrainerArtifact, PipelineError> {
        let mut run = PipelineRun::start();
        self.telemetry.note(
            LogLevel::Info,
            "pipeline run started",
            json!({ "run_id": run.run_id }),
        );

        let result = self.drive(&mut run);
        run.finished_at = Some(Utc::now());

        match &result {
            Ok(artifact) => {
                self.telemetry.note(
                    LogLevel::Info,
                    "pipeline run completed",
                    json!({ "run_id": run.run_id, "artifact": artifact.to_string() }),
                );
                self.telemetry.announce(
                    "pipeline.completed",
                    json!({
                        "run_id": run.run_id,
                        "trained_model_file_path": artifact.trained_model_file_path,
                        "metric_artifact": artifact.metric_artifact,
                    }),
                );
            }
            Err(err) => {
                let cause = match err {
                    PipelineError::Stage { source, .. } => format!("{source:#}"),
                    PipelineError::ModelBelowThreshold { .. } => err.to_string(),
                };
                self.telemetry.note(
                    LogLevel::Error,
                    "pipeline run failed",
                    json!({ "run_id": run.run_id, "stage": err.stage(), "error": cause }),
                );
            }
        }
        *self.last_run.lock() = Some(run);
        result
    }

    fn drive(&self, run: &mut PipelineRun) -> Result<ModelTrainerArtifact, PipelineError> {
        run.enter(PipelineState::Ingesting);
        let ingestion = self.invoke(run, &self.ingestion, &())?;

        run.enter(PipelineState::Validating);
        let validation = self.invoke(run, &self.validation, &ingestion)?;
        if !validation.validation_status {
            self.telemetry.note(
                LogLevel::Warn,
                "data validation reported problems",
                json!({
                    "run_id": run.run_id,
                    "message": validation.message,
                    "report": validation.validation_report_file_path,
                    "halting": self.halt_on_invalid_data,
                }),
            );
            if self.halt_on_invalid_data {
                let source = anyhow!("data validation failed: {}", validation.message);
                return Err(self.stage_failed(run, StageName::DataValidation, source));
            }
        }

        run.enter(PipelineState::Transforming);
        let transformation = self.invoke(run, &self.transformation, &(ingestion, validation))?;

        run.enter(PipelineState::Training);
        match self.invoke(run, &self.trainer, &transformation)? {
            TrainerOutcome::Accepted(artifact) => {
                run.enter(PipelineState::Done);
                Ok(artifact)
            }
            TrainerOutcome::Rejected { observed, required } => {
                run.fail(StageName::ModelTrainer);
                self.telemetry.announce(
                    "pipeline.model.rejected",
                    json!({ "run_id": run.run_id, "observed": observed, "required": required }),
                );
                Err(PipelineError::ModelBelowThreshold { observed, required })
            }
        }
    }

    fn invoke<In, S>(&self, run: &mut PipelineRun, stage: &S, input: &In) -> Result<S::Output, PipelineError>
    where
        S: Stage<In>,
    {
        let name = stage.name();
        self.telemetry.announce(
            "pipeline.stage.started",
            json!({ "run_id": run.run_id, "stage": name }),
        );
        let started = Instant::now();
        match stage.run(input) {
            Ok(output) => {
                let elapsed_ms = started.elapsed().as_millis();
                self.telemetry.note(
                    LogLevel::Info,
                    "stage completed",
                    json!({ "run_id": run.run_id, "stage": name, "elapsed_ms": elapsed_ms }),
                );
                self.telemetry.announce(
                    "pipeline.stage.completed",
                    json!({ "run_id": run.run_id, "stage": name, "elapsed_ms": elapsed_ms }),
                );
                Ok(output)
            }
            Err(source) => Err(self.stage_failed(run, name, source)),
        }
    }

    fn stage_failed(
        &self,
        run: &mut PipelineRun,
        stage: StageName,
        source: anyhow::Error,
    ) -> PipelineError {
        run.fail(stage);
        self.telemetry.announce(
            "pipeline.stage.failed",
            json!({ "run_id": run.run_id, "stage": stage, "error": format!("{source:#}") }),
        );
        PipelineError::Stage { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_run_starts_idle() {
        let run = PipelineRun::start();
        assert_eq!(run.state(), PipelineState::Idle);
        assert_eq!(run.states(), [PipelineState::Idle]);
        assert!(run.failed_stage().is_none());
        assert!(run.finished_at().is_none());
    }

    #[test]
    fn failure_records_stage_and_terminal_state() {
        let mut run = PipelineRun::start();
        run.enter(PipelineState::Ingesting);
        run.fail(StageName::DataIngestion);
        assert_eq!(run.state(), PipelineState::Failed);
        assert!(run.state().is_terminal());
        assert_eq!(run.failed_stage(), Some(StageName::DataIngestion));
    }

    #[test]
    fn error_messages_name_stage_and_accuracies() {
        let stage = PipelineError::Stage {
            stage: StageName::DataIngestion,
            source: anyhow!("export missing"),
        };
        assert_eq!(stage.to_string(), "data_ingestion stage failed");
        assert_eq!(
            format!("{:#}", anyhow::Error::from(stage)),
            "data_ingestion stage failed: export missing"
        );
        let rejected = PipelineError::ModelBelowThreshold {
            observed: 0.5,
            required: 1.01,
        };
        assert_eq!(
            rejected.to_string(),
            "model_trainer stage rejected the model: accuracy 0.5000 is below the required 1.0100"
        );
        assert_eq!(rejected.stage(), StageName::ModelTrainer);
        assert!(format!("{:#}", anyhow::Error::from(rejected)).contains("model_trainer"));
    }
}
