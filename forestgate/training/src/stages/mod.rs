//! Stage contract shared by every pipeline step, plus the file-based
//! ingestion, validation and transformation stages.

mod ingestion;
mod transformation;
mod validation;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use ingestion::DataIngestion;
pub use transformation::DataTransformation;
pub use validation::{DataValidation, ValidationReport};

/// Identifies a stage in logs, events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Raw records to train/test split.
    DataIngestion,
    /// Schema checks on the split.
    DataValidation,
    /// Feature engineering into numeric matrices.
    DataTransformation,
    /// Training, evaluation and promotion.
    ModelTrainer,
}

impl StageName {
    /// Snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataIngestion => "data_ingestion",
            Self::DataValidation => "data_validation",
            Self::DataTransformation => "data_transformation",
            Self::ModelTrainer => "model_trainer",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline step: consumes its predecessors' artifacts, produces one output or fails.
pub trait Stage<In>: Send + Sync {
    /// Artifact produced on success.
    type Output;

    /// Stage identifier.
    fn name(&self) -> StageName;

    /// Runs the stage. Inputs are borrowed and never modified.
    fn run(&self, input: &In) -> anyhow::Result<Self::Output>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(StageName::ModelTrainer.to_string(), "model_trainer");
        assert_eq!(
            serde_json::to_value(StageName::DataValidation).unwrap(),
            "data_validation"
        );
    }
}
