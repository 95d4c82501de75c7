use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use super::{Stage, StageName};
use crate::{
    artifact::{DataIngestionArtifact, DataValidationArtifact},
    config::{ArtifactLayout, ColumnKind, ValidationConfig},
    store::ArtifactStore,
    tabular::{parse_finite, Table},
    telemetry::PipelineTelemetry,
};

/// JSON report written next to the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when `issues` is empty.
    pub validation_status: bool,
    /// Rows in the training split.
    pub train_rows: usize,
    /// Rows in the test split.
    pub test_rows: usize,
    /// One entry per failed check.
    pub issues: Vec<String>,
}

/// Checks the ingested splits against the declared column schema.
#[derive(Debug, Clone)]
pub struct DataValidation {
    config: ValidationConfig,
    layout: ArtifactLayout,
    store: ArtifactStore,
    telemetry: PipelineTelemetry,
}

impl DataValidation {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: ValidationConfig, layout: ArtifactLayout, store: ArtifactStore) -> Self {
        Self {
            config,
            layout,
            store,
            telemetry: PipelineTelemetry::disabled(StageName::DataValidation.as_str()),
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn check_split(&self, split: &str, table: &Table, issues: &mut Vec<String>) {
        let schema = &self.config.columns;
        if !schema.is_empty() && table.columns().len() != schema.len() {
            issues.push(format!(
                "{split}: expected {} columns, found {}",
                schema.len(),
                table.columns().len()
            ));
        }
        for spec in schema {
            let Ok(cells) = table.column(&spec.name) else {
                issues.push(format!("{split}: missing column `{}`", spec.name));
                continue;
            };
            if spec.kind == ColumnKind::Numeric {
                let bad = cells.filter(|cell| parse_finite(cell).is_none()).count();
                if bad > 0 {
                    issues.push(format!(
                        "{split}: column `{}` has {bad} non-numeric value(s)",
                        spec.name
                    ));
                }
            }
        }
    }
}

impl Stage<DataIngestionArtifact> for DataValidation {
    type Output = DataValidationArtifact;

    fn name(&self) -> StageName {
        StageName::DataValidation
    }

    fn run(&self, input: &DataIngestionArtifact) -> Result<DataValidationArtifact> {
        let train = Table::read_csv(&input.trained_file_path)
            .with_context(|| format!("reading {}", input.trained_file_path.display()))?;
        let test = Table::read_csv(&input.test_file_path)
            .with_context(|| format!("reading {}", input.test_file_path.display()))?;

        let mut issues = Vec::new();
        self.check_split("train", &train, &mut issues);
        self.check_split("test", &test, &mut issues);
        if train.columns() != test.columns() {
            issues.push("train and test headers differ".to_owned());
        }

        let report = ValidationReport {
            validation_status: issues.is_empty(),
            train_rows: train.len(),
            test_rows: test.len(),
            issues,
        };
        let path = self.layout.validation_report_file();
        self.store.save_object(&path, &report)?;

        let message = report.issues.join("; ");
        self.telemetry.note(
            if report.validation_status {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            "validation report written",
            json!({
                "validation_status": report.validation_status,
                "issues": report.issues.len(),
                "report": path.display().to_string(),
            }),
        );
        Ok(DataValidationArtifact {
            validation_status: report.validation_status,
            message,
            validation_report_file_path: path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnSpec;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn ingested(dir: &Path, train: &str, test: &str) -> DataIngestionArtifact {
        let artifact = DataIngestionArtifact {
            feature_store_file_path: dir.join("data.csv"),
            trained_file_path: dir.join("train.csv"),
            test_file_path: dir.join("test.csv"),
        };
        fs::write(&artifact.trained_file_path, train).unwrap();
        fs::write(&artifact.test_file_path, test).unwrap();
        artifact
    }

    fn stage(dir: &Path) -> DataValidation {
        DataValidation::new(
            ValidationConfig {
                columns: vec![
                    ColumnSpec {
                        name: "Age".into(),
                        kind: ColumnKind::Numeric,
                    },
                    ColumnSpec {
                        name: "Gender".into(),
                        kind: ColumnKind::Categorical,
                    },
                ],
            },
            ArtifactLayout::new(dir.join("artifact")),
            ArtifactStore::new(),
        )
    }

    #[test]
    fn clean_splits_pass() {
        let dir = tempdir().unwrap();
        let input = ingested(dir.path(), "Age,Gender\n30,Male\n", "Age,Gender\n41,Female\n");
        let artifact = stage(dir.path()).run(&input).unwrap();
        assert!(artifact.validation_status);
        assert!(artifact.message.is_empty());
        let report: ValidationReport = ArtifactStore::new()
            .load_object(&artifact.validation_report_file_path)
            .unwrap();
        assert_eq!(report.train_rows, 1);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn schema_drift_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let input = ingested(dir.path(), "Age,Gender\nold,Male\n", "Age\n41\n");
        let artifact = stage(dir.path()).run(&input).unwrap();
        assert!(!artifact.validation_status);
        assert!(artifact.message.contains("train: column `Age` has 1 non-numeric value(s)"));
        assert!(artifact.message.contains("test: missing column `Gender`"));
        assert!(artifact.message.contains("headers differ"));
    }

    #[test]
    fn non_finite_numbers_fail_the_numeric_check() {
        let dir = tempdir().unwrap();
        let input = ingested(
            dir.path(),
            "Age,Gender\nNaN,Male\ninf,Female\n",
            "Age,Gender\n41,Female\n",
        );
        let artifact = stage(dir.path()).run(&input).unwrap();
        assert!(!artifact.validation_status);
        assert_eq!(artifact.message, "train: column `Age` has 2 non-numeric value(s)");
    }
}
