use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};
use serde_json::json;
use shared_logging::LogLevel;

use super::{Stage, StageName};
use crate::{
    artifact::{DataIngestionArtifact, DataTransformationArtifact, DataValidationArtifact},
    config::{ArtifactLayout, TransformationConfig},
    dataset::LabeledMatrix,
    estimator::{Preprocessor, TargetValueMapping},
    store::ArtifactStore,
    tabular::Table,
    telemetry::PipelineTelemetry,
};

/// Turns the validated CSV splits into numeric matrices with a trailing label column.
#[derive(Debug, Clone)]
pub struct DataTransformation {
    config: TransformationConfig,
    layout: ArtifactLayout,
    store: ArtifactStore,
    telemetry: PipelineTelemetry,
}

impl DataTransformation {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: TransformationConfig, layout: ArtifactLayout, store: ArtifactStore) -> Self {
        Self {
            config,
            layout,
            store,
            telemetry: PipelineTelemetry::disabled(StageName::DataTransformation.as_str()),
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn labels(&self, table: &Table) -> Result<Array1<f64>> {
        let mapping = TargetValueMapping::new(&self.config.positive_label);
        Ok(mapping.encode_column(table, &self.config.target_column)?)
    }
}

fn with_trailing_label(features: Array2<f64>, labels: Array1<f64>) -> Result<Array2<f64>> {
    Ok(LabeledMatrix::new(features, labels)?.to_trailing_label())
}

impl Stage<(DataIngestionArtifact, DataValidationArtifact)> for DataTransformation {
    type Output = DataTransformationArtifact;

    fn name(&self) -> StageName {
        StageName::DataTransformation
    }

    fn run(
        &self,
        (ingestion, validation): &(DataIngestionArtifact, DataValidationArtifact),
    ) -> Result<DataTransformationArtifact> {
        if !validation.validation_status {
            bail!(
                "refusing to transform data that failed validation: {}",
                validation.message
            );
        }
        let train = Table::read_csv(&ingestion.trained_file_path)
            .with_context(|| format!("reading {}", ingestion.trained_file_path.display()))?;
        let test = Table::read_csv(&ingestion.test_file_path)
            .with_context(|| format!("reading {}", ingestion.test_file_path.display()))?;

        let mut preprocessor = Preprocessor::for_table(&train, &self.config);
        let train_features = preprocessor
            .fit_transform(&train)
            .context("fitting preprocessor on the training split")?;
        let test_features = preprocessor
            .transform(&test)
            .context("transforming the test split")?;
        let train_matrix = with_trailing_label(train_features, self.labels(&train)?)?;
        let test_matrix = with_trailing_label(test_features, self.labels(&test)?)?;

        let artifact = DataTransformationArtifact {
            transformed_object_file_path: self.layout.preprocessor_file(),
            transformed_train_file_path: self.layout.transformed_train_file(),
            transformed_test_file_path: self.layout.transformed_test_file(),
        };
        self.store
            .save_matrix(&artifact.transformed_train_file_path, &train_matrix)?;
        self.store
            .save_matrix(&artifact.transformed_test_file_path, &test_matrix)?;
        self.store
            .save_object(&artifact.transformed_object_file_path, &preprocessor)?;

        self.telemetry.note(
            LogLevel::Info,
            "splits transformed",
            json!({
                "features": preprocessor.feature_columns(),
                "train_shape": train_matrix.shape(),
                "test_shape": test_matrix.shape(),
            }),
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scaling;
    use indexmap::IndexMap;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn inputs(dir: &Path, status: bool) -> (DataIngestionArtifact, DataValidationArtifact) {
        let ingestion = DataIngestionArtifact {
            feature_store_file_path: dir.join("data.csv"),
            trained_file_path: dir.join("train.csv"),
            test_file_path: dir.join("test.csv"),
        };
        fs::write(
            &ingestion.trained_file_path,
            "id,Gender,Age,Response\n1,Male,20,0\n2,Female,40,1\n3,Male,60,1\n",
        )
        .unwrap();
        fs::write(&ingestion.test_file_path, "id,Gender,Age,Response\n4,Female,30,0\n").unwrap();
        let validation = DataValidationArtifact {
            validation_status: status,
            message: if status { String::new() } else { "bad".into() },
            validation_report_file_path: dir.join("report.json"),
        };
        (ingestion, validation)
    }

    fn stage(dir: &Path) -> DataTransformation {
        let mut gender = IndexMap::new();
        gender.insert("Female".to_owned(), 0.0);
        gender.insert("Male".to_owned(), 1.0);
        let mut categorical = IndexMap::new();
        categorical.insert("Gender".to_owned(), gender);
        DataTransformation::new(
            TransformationConfig {
                scaling: Scaling::MinMax,
                categorical,
                ..TransformationConfig::default()
            },
            ArtifactLayout::new(dir.join("artifact")),
            ArtifactStore::new(),
        )
    }

    #[test]
    fn writes_matrices_with_trailing_label() {
        let dir = tempdir().unwrap();
        let artifact = stage(dir.path()).run(&inputs(dir.path(), true)).unwrap();
        let store = ArtifactStore::new();
        let train = store.load_matrix(&artifact.transformed_train_file_path).unwrap();
        assert_eq!(train.shape(), &[3, 3]);
        assert_eq!(train.column(2).to_vec(), vec![0.0, 1.0, 1.0]);
        assert_eq!(train.column(1).to_vec(), vec![0.0, 0.5, 1.0]);
        let test = store.load_matrix(&artifact.transformed_test_file_path).unwrap();
        assert_eq!(test.row(0).to_vec(), vec![0.0, 0.25, 0.0]);
        let preprocessor: Preprocessor = store
            .load_object(&artifact.transformed_object_file_path)
            .unwrap();
        assert!(preprocessor.is_fitted());
        assert_eq!(preprocessor.feature_columns(), ["Gender", "Age"]);
    }

    #[test]
    fn refuses_failed_validation() {
        let dir = tempdir().unwrap();
        let err = stage(dir.path()).run(&inputs(dir.path(), false)).unwrap_err();
        assert!(err.to_string().contains("failed validation"));
        assert!(!dir.path().join("artifact").exists());
    }
}
