#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Forestgate training stack: stage orchestration, random forest training and
//! the accuracy gate that decides whether a model gets promoted.

/// Immutable artifacts handed from stage to stage.
pub mod artifact;
/// Static pipeline and trainer configuration.
pub mod config;
/// Typed feature/label split of numeric matrices.
pub mod dataset;
/// Prediction unit and the preprocessing transformer it owns.
pub mod estimator;
/// Bagged CART ensemble.
pub mod forest;
/// Promotion gate.
pub mod gate;
/// Binary classification metrics.
pub mod metrics;
/// Stage sequencing and run bookkeeping.
pub mod pipeline;
/// Stage contract plus the ingestion/validation/transformation stages.
pub mod stages;
/// File-backed artifact store.
pub mod store;
/// Raw string tables read from CSV.
pub mod tabular;
/// Injected logging and event handle.
pub mod telemetry;
/// Model trainer stage.
pub mod trainer;

pub use artifact::{
    ClassificationMetricArtifact, DataIngestionArtifact, DataTransformationArtifact,
    DataValidationArtifact, ModelTrainerArtifact,
};
pub use config::{
    ArtifactLayout, GateSplit, MaxFeatures, PipelineConfig, Scaling, SplitCriterion,
    TrainingConfig,
};
pub use dataset::LabeledMatrix;
pub use estimator::{PredictionUnit, Preprocessor, TargetValueMapping};
pub use forest::RandomForestClassifier;
pub use gate::{GateDecision, PromotionGate};
pub use metrics::ClassificationReport;
pub use pipeline::{DefaultPipeline, PipelineError, PipelineRun, PipelineState, TrainingPipeline};
pub use stages::{DataIngestion, DataTransformation, DataValidation, Stage, StageName};
pub use store::{ArtifactStore, StoreError};
pub use tabular::Table;
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use trainer::{ModelTrainer, TrainerError, TrainerOutcome, TrainingFailure};
