use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Impurity measure used to score candidate splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    /// Gini impurity.
    Gini,
    /// Shannon entropy (information gain).
    #[default]
    Entropy,
}

impl fmt::Display for SplitCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gini => f.write_str("gini"),
            Self::Entropy => f.write_str("entropy"),
        }
    }
}

/// Number of candidate features inspected per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    /// `floor(sqrt(n))`, at least one.
    #[default]
    Sqrt,
    /// `floor(log2(n))`, at least one.
    Log2,
    /// Every feature.
    All,
}

impl MaxFeatures {
    /// Resolves the policy against a concrete feature count.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let count = match self {
            Self::Sqrt => n.sqrt().floor() as usize,
            Self::Log2 => n.log2().floor() as usize,
            Self::All => n_features,
        };
        count.clamp(1, n_features.max(1))
    }
}

/// Which split the promotion gate measures accuracy on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateSplit {
    /// Training matrix. Blind to overfitting, kept as the default for parity.
    #[default]
    Train,
    /// Held-out test matrix.
    Test,
}

/// Column-wise scaling fitted by the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// Zero mean, unit (population) variance.
    #[default]
    Standard,
    /// Rescale to `[0, 1]`.
    MinMax,
    /// Pass values through.
    None,
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A field is outside its accepted range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Hyperparameters and thresholds for the model trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of trees in the ensemble.
    pub ensemble_size: usize,
    /// Split quality measure.
    pub split_criterion: SplitCriterion,
    /// Minimum samples a node needs before it may split.
    pub min_samples_split: usize,
    /// Minimum samples each child must keep.
    pub min_samples_leaf: usize,
    /// Depth limit; `None` grows trees until leaves are pure or too small.
    pub max_depth: Option<usize>,
    /// Candidate features per split.
    pub max_features: MaxFeatures,
    /// Seed for bootstrap sampling and feature shuffling.
    pub random_seed: u64,
    /// Minimum accuracy a model needs to be promoted.
    pub expected_accuracy_threshold: f64,
    /// Split the gate measures.
    pub gate_split: GateSplit,
    /// Where the promoted prediction unit is written.
    pub output_model_path: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 200,
            split_criterion: SplitCriterion::Entropy,
            min_samples_split: 7,
            min_samples_leaf: 6,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            random_seed: 101,
            expected_accuracy_threshold: 0.6,
            gate_split: GateSplit::Train,
            output_model_path: PathBuf::from("model/model.json"),
        }
    }
}

impl TrainingConfig {
    /// Checks value ranges. Thresholds above 1 are allowed and simply unreachable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ensemble_size == 0 {
            return Err(ConfigError::invalid("ensemble_size", "must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(ConfigError::invalid("min_samples_split", "must be at least 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(ConfigError::invalid("min_samples_leaf", "must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(ConfigError::invalid("max_depth", "must be at least 1 when set"));
        }
        if !self.expected_accuracy_threshold.is_finite() {
            return Err(ConfigError::invalid(
                "expected_accuracy_threshold",
                "must be a finite number",
            ));
        }
        if self.output_model_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output_model_path", "must not be empty"));
        }
        Ok(())
    }
}

/// Source of raw records and split parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Flat CSV export of the record store.
    pub source_path: PathBuf,
    /// Fraction of rows held out for testing.
    pub test_ratio: f64,
    /// Shuffle seed.
    pub seed: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("data/export.csv"),
            test_ratio: 0.25,
            seed: 42,
        }
    }
}

/// Declared kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Every value parses as a number.
    Numeric,
    /// Free-form labels.
    Categorical,
}

/// One column of the expected schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Header name.
    pub name: String,
    /// Expected kind.
    pub kind: ColumnKind,
}

/// Expected schema of ingested data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Columns in the order the export produces them.
    pub columns: Vec<ColumnSpec>,
}

/// Feature engineering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationConfig {
    /// Column holding the label.
    pub target_column: String,
    /// Raw label value mapped to class `1`.
    pub positive_label: String,
    /// Columns removed before encoding (identifiers and the like).
    pub drop_columns: Vec<String>,
    /// Scaling fitted on the training split.
    pub scaling: Scaling,
    /// Static code tables for categorical columns.
    pub categorical: IndexMap<String, IndexMap<String, f64>>,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            target_column: "Response".into(),
            positive_label: "1".into(),
            drop_columns: vec!["id".into()],
            scaling: Scaling::Standard,
            categorical: IndexMap::new(),
        }
    }
}

/// Directory layout for intermediate artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full copy of the exported records.
    #[must_use]
    pub fn feature_store_file(&self) -> PathBuf {
        self.root.join("data_ingestion/feature_store/data.csv")
    }

    /// Ingested training split.
    #[must_use]
    pub fn train_file(&self) -> PathBuf {
        self.root.join("data_ingestion/ingested/train.csv")
    }

    /// Ingested test split.
    #[must_use]
    pub fn test_file(&self) -> PathBuf {
        self.root.join("data_ingestion/ingested/test.csv")
    }

    /// Validation report.
    #[must_use]
    pub fn validation_report_file(&self) -> PathBuf {
        self.root.join("data_validation/report.json")
    }

    /// Transformed training matrix.
    #[must_use]
    pub fn transformed_train_file(&self) -> PathBuf {
        self.root.join("data_transformation/transformed/train.bin")
    }

    /// Transformed test matrix.
    #[must_use]
    pub fn transformed_test_file(&self) -> PathBuf {
        self.root.join("data_transformation/transformed/test.bin")
    }

    /// Fitted preprocessing object.
    #[must_use]
    pub fn preprocessor_file(&self) -> PathBuf {
        self.root
            .join("data_transformation/transformed_object/preprocessing.json")
    }
}

/// Whole-pipeline configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root for intermediate artifacts.
    pub artifact_dir: PathBuf,
    /// Stop after validation when the verdict is negative.
    pub halt_on_invalid_data: bool,
    /// Ingestion settings.
    pub ingestion: IngestionConfig,
    /// Validation settings.
    pub validation: ValidationConfig,
    /// Transformation settings.
    pub transformation: TransformationConfig,
    /// Trainer settings.
    pub trainer: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("artifact"),
            halt_on_invalid_data: false,
            ingestion: IngestionConfig::default(),
            validation: ValidationConfig::default(),
            transformation: TransformationConfig::default(),
            trainer: TrainingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from a TOML file. Relative paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);
        config
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.ingestion.test_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::invalid(
                "ingestion.test_ratio",
                format!("{ratio} is not in (0, 1)"),
            ));
        }
        if self.transformation.target_column.trim().is_empty() {
            return Err(ConfigError::invalid(
                "transformation.target_column",
                "must not be empty",
            ));
        }
        self.trainer.validate()
    }

    /// Intermediate artifact layout.
    #[must_use]
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.artifact_dir)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.artifact_dir,
            &mut self.ingestion.source_path,
            &mut self.trainer.output_model_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn max_features_resolves_against_width() {
        assert_eq!(MaxFeatures::Sqrt.resolve(2), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Log2.resolve(9), 3);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
    }

    #[test]
    fn training_config_rejects_bad_ranges() {
        let mut config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        config.min_samples_split = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "min_samples_split", .. })
        ));
        config = TrainingConfig {
            max_depth: Some(0),
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
        config = TrainingConfig {
            expected_accuracy_threshold: 1.01,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_toml_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
artifact_dir = "artifact"
halt_on_invalid_data = true

[ingestion]
source_path = "data/export.csv"

[validation]
columns = [{ name = "Age", kind = "numeric" }, { name = "Gender", kind = "categorical" }]

[transformation]
target_column = "Response"
scaling = "min_max"
[transformation.categorical]
Gender = { Female = 0, Male = 1 }

[trainer]
ensemble_size = 10
split_criterion = "gini"
max_depth = 4
random_seed = 42
expected_accuracy_threshold = 0.5
output_model_path = "model/model.json"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert!(config.halt_on_invalid_data);
        assert_eq!(config.artifact_dir, dir.path().join("artifact"));
        assert_eq!(config.ingestion.source_path, dir.path().join("data/export.csv"));
        assert!((config.ingestion.test_ratio - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.validation.columns.len(), 2);
        assert_eq!(config.transformation.scaling, Scaling::MinMax);
        assert_eq!(config.transformation.categorical["Gender"]["Male"], 1.0);
        assert_eq!(config.trainer.split_criterion, SplitCriterion::Gini);
        assert_eq!(config.trainer.max_depth, Some(4));
        assert_eq!(config.trainer.min_samples_leaf, 6);
        assert_eq!(
            config.trainer.output_model_path,
            dir.path().join("model/model.json")
        );
    }

    #[test]
    fn load_rejects_invalid_ratio() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[ingestion]\ntest_ratio = 1.5\n").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("test_ratio"));
    }
}
