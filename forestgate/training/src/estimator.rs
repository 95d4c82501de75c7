//! Deployable bundle: the fitted preprocessing transformer plus the fitted
//! forest, persisted together as one JSON document.

use std::path::Path;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{Scaling, TransformationConfig},
    forest::{ForestError, RandomForestClassifier},
    store::{ArtifactStore, StoreError},
    tabular::{parse_finite, Table},
};

/// Failures while turning raw cells into numbers.
#[derive(Debug, Error, PartialEq)]
pub enum PreprocessError {
    /// A required column is absent from the batch.
    #[error("missing column `{0}`")]
    MissingColumn(String),
    /// A categorical value has no code.
    #[error("column `{column}` has no code for `{value}`")]
    UnknownCategory {
        /// Column name.
        column: String,
        /// Raw value.
        value: String,
    },
    /// A numeric cell failed to parse.
    #[error("column `{column}` row {row}: `{value}` is not a number")]
    NotNumeric {
        /// Column name.
        column: String,
        /// Zero-based data row.
        row: usize,
        /// Raw value.
        value: String,
    },
    /// Fitting needs at least one row.
    #[error("cannot fit scaling on an empty batch")]
    EmptyBatch,
    /// Transform called before fit.
    #[error("preprocessor has not been fitted")]
    NotFitted,
}

/// Errors raised by a prediction unit.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// Preprocessing failed.
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    /// The classifier rejected the transformed batch.
    #[error(transparent)]
    Forest(#[from] ForestError),
    /// Persisting or loading failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maps raw target values onto `{0, 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetValueMapping {
    positive_label: String,
}

impl TargetValueMapping {
    /// Values equal to `positive_label` (after trimming) map to `1`, everything else to `0`.
    #[must_use]
    pub fn new(positive_label: impl Into<String>) -> Self {
        Self {
            positive_label: positive_label.into(),
        }
    }

    /// Encodes one raw value.
    #[must_use]
    pub fn encode(&self, raw: &str) -> f64 {
        if raw.trim() == self.positive_label {
            1.0
        } else {
            0.0
        }
    }

    /// Encodes a whole column of `table`.
    pub fn encode_column(&self, table: &Table, column: &str) -> Result<Array1<f64>, PreprocessError> {
        let cells = table
            .column(column)
            .map_err(|_| PreprocessError::MissingColumn(column.to_owned()))?;
        Ok(cells.map(|raw| self.encode(raw)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ColumnScale {
    offset: f64,
    scale: f64,
}

impl ColumnScale {
    const IDENTITY: Self = Self {
        offset: 0.0,
        scale: 1.0,
    };

    fn fit(kind: Scaling, values: &[f64]) -> Self {
        let n = values.len() as f64;
        let (offset, spread) = match kind {
            Scaling::None => return Self::IDENTITY,
            Scaling::Standard => {
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, variance.sqrt())
            }
            Scaling::MinMax => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max - min)
            }
        };
        Self {
            offset,
            scale: if spread > 0.0 && spread.is_finite() { spread } else { 1.0 },
        }
    }
}

/// Column encoder and scaler fitted on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    feature_columns: Vec<String>,
    categorical: IndexMap<String, IndexMap<String, f64>>,
    scaling: Scaling,
    fitted: Vec<ColumnScale>,
}

impl Preprocessor {
    /// Unfitted preprocessor over `feature_columns`, in that order.
    #[must_use]
    pub fn new(
        feature_columns: Vec<String>,
        categorical: IndexMap<String, IndexMap<String, f64>>,
        scaling: Scaling,
    ) -> Self {
        Self {
            feature_columns,
            categorical,
            scaling,
            fitted: Vec::new(),
        }
    }

    /// Derives the feature columns of `table` from the transformation settings:
    /// everything except dropped columns and the target.
    #[must_use]
    pub fn for_table(table: &Table, config: &TransformationConfig) -> Self {
        let feature_columns = table
            .columns()
            .iter()
            .filter(|column| {
                **column != config.target_column && !config.drop_columns.contains(*column)
            })
            .cloned()
            .collect();
        Self::new(feature_columns, config.categorical.clone(), config.scaling)
    }

    /// Ordered feature column names.
    #[must_use]
    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    /// True once scaling parameters exist.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted.len() == self.feature_columns.len()
    }

    /// Converts raw cells into an unscaled numeric matrix.
    pub fn encode(&self, table: &Table) -> Result<Array2<f64>, PreprocessError> {
        let mut matrix = Array2::zeros((table.len(), self.feature_columns.len()));
        for (col, name) in self.feature_columns.iter().enumerate() {
            let cells = table
                .column(name)
                .map_err(|_| PreprocessError::MissingColumn(name.clone()))?;
            let codes = self.categorical.get(name);
            for (row, raw) in cells.enumerate() {
                matrix[[row, col]] = match codes {
                    Some(codes) => *codes.get(raw).ok_or_else(|| PreprocessError::UnknownCategory {
                        column: name.clone(),
                        value: raw.to_owned(),
                    })?,
                    None => parse_finite(raw).ok_or_else(|| PreprocessError::NotNumeric {
                        column: name.clone(),
                        row,
                        value: raw.to_owned(),
                    })?,
                };
            }
        }
        Ok(matrix)
    }

    /// Fits scaling parameters on `table`.
    pub fn fit(&mut self, table: &Table) -> Result<(), PreprocessError> {
        if table.is_empty() {
            return Err(PreprocessError::EmptyBatch);
        }
        let encoded = self.encode(table)?;
        self.fitted = encoded
            .axis_iter(Axis(1))
            .map(|column| ColumnScale::fit(self.scaling, &column.to_vec()))
            .collect();
        Ok(())
    }

    /// Encodes and scales `table` with the fitted parameters.
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>, PreprocessError> {
        if !self.is_fitted() {
            return Err(PreprocessError::NotFitted);
        }
        let mut matrix = self.encode(table)?;
        for (mut column, params) in matrix.axis_iter_mut(Axis(1)).zip(&self.fitted) {
            column.mapv_inplace(|value| (value - params.offset) / params.scale);
        }
        Ok(matrix)
    }

    /// Fits on `table`, then transforms it.
    pub fn fit_transform(&mut self, table: &Table) -> Result<Array2<f64>, PreprocessError> {
        self.fit(table)?;
        self.transform(table)
    }

    /// Fits a private copy on `table` and transforms with it; `self` is untouched.
    pub fn refit_transform(&self, table: &Table) -> Result<Array2<f64>, PreprocessError> {
        self.clone().fit_transform(table)
    }
}

/// Fitted preprocessor and classifier, owned together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionUnit {
    preprocessor: Preprocessor,
    classifier: RandomForestClassifier,
}

impl PredictionUnit {
    /// Bundles a fitted preprocessor with a fitted classifier.
    #[must_use]
    pub const fn new(preprocessor: Preprocessor, classifier: RandomForestClassifier) -> Self {
        Self {
            preprocessor,
            classifier,
        }
    }

    /// Predicts `0.0`/`1.0` per row.
    ///
    /// The preprocessor is re-fitted on this batch before transforming, so
    /// scaling follows the batch statistics rather than the training split.
    /// Use [`Self::predict_frozen`] to apply the training-time parameters.
    pub fn predict(&self, batch: &Table) -> Result<Array1<f64>, EstimatorError> {
        let features = self.preprocessor.refit_transform(batch)?;
        Ok(self.classifier.predict(features.view())?)
    }

    /// Predicts with the scaling parameters fitted on the training split.
    pub fn predict_frozen(&self, batch: &Table) -> Result<Array1<f64>, EstimatorError> {
        let features = self.preprocessor.transform(batch)?;
        Ok(self.classifier.predict(features.view())?)
    }

    /// Owned preprocessor.
    #[must_use]
    pub const fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Owned classifier.
    #[must_use]
    pub const fn classifier(&self) -> &RandomForestClassifier {
        &self.classifier
    }

    /// Writes the unit atomically to `path`.
    pub fn persist(&self, store: &ArtifactStore, path: impl AsRef<Path>) -> Result<(), EstimatorError> {
        store.save_object(path, self)?;
        Ok(())
    }

    /// Reads a unit written by [`Self::persist`].
    pub fn load(store: &ArtifactStore, path: impl AsRef<Path>) -> Result<Self, EstimatorError> {
        Ok(store.load_object(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MaxFeatures, SplitCriterion},
        dataset::LabeledMatrix,
        forest::ForestParams,
    };
    use ndarray::concatenate;
    use tempfile::tempdir;

    fn table(rows: &[[&str; 4]]) -> Table {
        Table::new(
            ["id", "Gender", "Age", "Response"].map(String::from).to_vec(),
            rows.iter()
                .map(|row| row.iter().map(|cell| (*cell).to_owned()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn train_table() -> Table {
        table(&[
            ["1", "Male", "20", "0"],
            ["2", "Female", "22", "0"],
            ["3", "Male", "24", "0"],
            ["4", "Female", "60", "1"],
            ["5", "Male", "62", "1"],
            ["6", "Female", "64", "1"],
        ])
    }

    fn config(scaling: Scaling) -> TransformationConfig {
        let mut gender = IndexMap::new();
        gender.insert("Female".to_owned(), 0.0);
        gender.insert("Male".to_owned(), 1.0);
        let mut categorical = IndexMap::new();
        categorical.insert("Gender".to_owned(), gender);
        TransformationConfig {
            scaling,
            categorical,
            ..TransformationConfig::default()
        }
    }

    fn unit() -> PredictionUnit {
        let train = train_table();
        let mut preprocessor = Preprocessor::for_table(&train, &config(Scaling::Standard));
        let features = preprocessor.fit_transform(&train).unwrap();
        let labels = TargetValueMapping::new("1")
            .encode_column(&train, "Response")
            .unwrap();
        let raw = concatenate![Axis(1), features, labels.insert_axis(Axis(1))];
        let data = LabeledMatrix::from_trailing_label(&raw).unwrap();
        let forest = RandomForestClassifier::fit(
            &data,
            ForestParams {
                ensemble_size: 15,
                criterion: SplitCriterion::Gini,
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_depth: None,
                max_features: MaxFeatures::All,
                random_seed: 11,
            },
        )
        .unwrap();
        PredictionUnit::new(preprocessor, forest)
    }

    #[test]
    fn feature_columns_skip_id_and_target() {
        let preprocessor = Preprocessor::for_table(&train_table(), &config(Scaling::None));
        assert_eq!(preprocessor.feature_columns(), ["Gender", "Age"]);
        assert!(!preprocessor.is_fitted());
    }

    #[test]
    fn standard_scaling_centres_columns() {
        let train = train_table();
        let mut preprocessor = Preprocessor::for_table(&train, &config(Scaling::Standard));
        let matrix = preprocessor.fit_transform(&train).unwrap();
        for column in matrix.axis_iter(Axis(1)) {
            assert!(column.mean().unwrap().abs() < 1e-9);
        }
    }

    #[test]
    fn min_max_maps_into_unit_range() {
        let train = train_table();
        let mut preprocessor = Preprocessor::for_table(&train, &config(Scaling::MinMax));
        let matrix = preprocessor.fit_transform(&train).unwrap();
        assert_eq!(matrix[[0, 1]], 0.0);
        assert_eq!(matrix[[5, 1]], 1.0);
    }

    #[test]
    fn encode_errors_name_the_cell() {
        let mut preprocessor = Preprocessor::for_table(&train_table(), &config(Scaling::None));
        let bad = table(&[["1", "Other", "20", "0"]]);
        assert_eq!(
            preprocessor.fit(&bad).unwrap_err(),
            PreprocessError::UnknownCategory {
                column: "Gender".into(),
                value: "Other".into()
            }
        );
        let bad = table(&[["1", "Male", "old", "0"]]);
        assert!(matches!(
            preprocessor.fit(&bad),
            Err(PreprocessError::NotNumeric { row: 0, .. })
        ));
        assert_eq!(preprocessor.transform(&bad).unwrap_err(), PreprocessError::NotFitted);
    }

    #[test]
    fn target_mapping_is_binary() {
        let mapping = TargetValueMapping::new("1");
        assert_eq!(mapping.encode("1"), 1.0);
        assert_eq!(mapping.encode(" 1 "), 1.0);
        assert_eq!(mapping.encode("0"), 0.0);
        assert_eq!(mapping.encode("yes"), 0.0);
    }

    #[test]
    fn predict_refits_on_a_copy() {
        let unit = unit();
        let before = unit.preprocessor().clone();
        let batch = table(&[["9", "Male", "21", "0"], ["10", "Female", "63", "1"]]);
        let predictions = unit.predict(&batch).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(unit.preprocessor(), &before);
        let frozen = unit.predict_frozen(&batch).unwrap();
        assert_eq!(frozen.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn unit_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model/model.json");
        let store = ArtifactStore::new();
        let unit = unit();
        unit.persist(&store, &path).unwrap();
        assert_eq!(PredictionUnit::load(&store, &path).unwrap(), unit);
    }
}
