//! Bootstrap-aggregated CART ensemble for binary labels.
//!
//! Each tree gets its own `ChaCha8Rng` seeded from a per-tree seed drawn up
//! front from the forest seed, so trees fit in parallel on the rayon pool
//! and still come out identical run to run.

/// Single CART tree.
pub mod tree;

use ndarray::{Array1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{MaxFeatures, SplitCriterion, TrainingConfig},
    dataset::LabeledMatrix,
};
use tree::{DecisionTree, TreeParams};

/// Errors raised while fitting or applying the forest.
#[derive(Debug, Error, PartialEq)]
pub enum ForestError {
    /// No samples or no features.
    #[error("cannot fit on an empty matrix ({rows} rows x {cols} features)")]
    EmptyInput {
        /// Sample count.
        rows: usize,
        /// Feature count.
        cols: usize,
    },
    /// A label outside `{0, 1}`.
    #[error("label {value} at row {row} is not 0 or 1")]
    NonBinaryLabel {
        /// Offending row.
        row: usize,
        /// Offending value.
        value: f64,
    },
    /// Every training label has the same class.
    #[error("training labels contain only class {0}")]
    SingleClass(u8),
    /// Prediction input width differs from the fitted width.
    #[error("expected {expected} features, got {found}")]
    FeatureMismatch {
        /// Fitted width.
        expected: usize,
        /// Supplied width.
        found: usize,
    },
    /// Zero trees requested.
    #[error("ensemble size must be at least 1")]
    EmptyEnsemble,
}

/// Hyperparameters captured at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub ensemble_size: usize,
    /// Impurity measure.
    pub criterion: SplitCriterion,
    /// Minimum samples to split a node.
    pub min_samples_split: usize,
    /// Minimum samples per leaf.
    pub min_samples_leaf: usize,
    /// Optional depth limit.
    pub max_depth: Option<usize>,
    /// Candidate feature policy.
    pub max_features: MaxFeatures,
    /// Forest seed.
    pub random_seed: u64,
}

impl From<&TrainingConfig> for ForestParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            ensemble_size: config.ensemble_size,
            criterion: config.split_criterion,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_depth: config.max_depth,
            max_features: config.max_features,
            random_seed: config.random_seed,
        }
    }
}

/// Fitted random forest classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    /// Fits `params.ensemble_size` trees on bootstrap samples of `data`.
    pub fn fit(data: &LabeledMatrix, params: ForestParams) -> Result<Self, ForestError> {
        if params.ensemble_size == 0 {
            return Err(ForestError::EmptyEnsemble);
        }
        let (rows, cols) = (data.n_samples(), data.n_features());
        if rows == 0 || cols == 0 {
            return Err(ForestError::EmptyInput { rows, cols });
        }
        let classes = binary_classes(data)?;
        let positives = classes.iter().filter(|&&class| class == 1).count();
        if positives == 0 {
            return Err(ForestError::SingleClass(0));
        }
        if positives == rows {
            return Err(ForestError::SingleClass(1));
        }

        let tree_params = TreeParams {
            criterion: params.criterion,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_depth: params.max_depth,
            max_features: params.max_features.resolve(cols),
        };
        let mut master = ChaCha8Rng::seed_from_u64(params.random_seed);
        let seeds: Vec<u64> = (0..params.ensemble_size).map(|_| master.gen()).collect();
        let features = data.features();
        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut sample: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..rows)).collect();
                DecisionTree::fit(features, &classes, &mut sample, tree_params, &mut rng)
            })
            .collect();

        Ok(Self {
            params,
            n_features: cols,
            trees,
        })
    }

    /// Mean positive-class probability across trees, one entry per row.
    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ForestError> {
        if features.ncols() != self.n_features {
            return Err(ForestError::FeatureMismatch {
                expected: self.n_features,
                found: features.ncols(),
            });
        }
        let n_trees = self.trees.len() as f64;
        Ok(features
            .axis_iter(Axis(0))
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_proba(row))
                    .sum::<f64>()
                    / n_trees
            })
            .collect())
    }

    /// Hard `0.0`/`1.0` predictions; ties go to the negative class.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ForestError> {
        Ok(self
            .predict_proba(features)?
            .mapv(|proba| if proba > 0.5 { 1.0 } else { 0.0 }))
    }

    /// Width the forest was fitted on.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Hyperparameters used at fit time.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

fn binary_classes(data: &LabeledMatrix) -> Result<Vec<u8>, ForestError> {
    data.labels()
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            if value == 0.0 {
                Ok(0)
            } else if value == 1.0 {
                Ok(1)
            } else {
                Err(ForestError::NonBinaryLabel { row, value })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            ensemble_size: 10,
            criterion: SplitCriterion::Gini,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            random_seed: seed,
        }
    }

    fn separable() -> LabeledMatrix {
        LabeledMatrix::from_trailing_label(&array![
            [0.1, 5.0, 0.0],
            [0.2, 4.0, 0.0],
            [0.3, 6.0, 0.0],
            [0.4, 5.5, 0.0],
            [0.9, 1.0, 1.0],
            [0.8, 2.0, 1.0],
            [0.7, 1.5, 1.0],
            [0.6, 0.5, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn same_seed_same_forest() {
        let data = separable();
        let first = RandomForestClassifier::fit(&data, params(42)).unwrap();
        let second = RandomForestClassifier::fit(&data, params(42)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.trees().len(), 10);
    }

    #[test]
    fn learns_separable_data() {
        let data = separable();
        let forest = RandomForestClassifier::fit(
            &data,
            ForestParams {
                ensemble_size: 25,
                ..params(5)
            },
        )
        .unwrap();
        let predictions = forest.predict(data.features()).unwrap();
        assert_eq!(predictions, data.labels());
        let proba = forest.predict_proba(array![[0.05, 10.0], [0.95, 0.0]].view()).unwrap();
        assert!(proba[0] < 0.5 && proba[1] > 0.5);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let single = LabeledMatrix::from_trailing_label(&array![[1.0, 1.0], [2.0, 1.0]]).unwrap();
        assert_eq!(
            RandomForestClassifier::fit(&single, params(1)).unwrap_err(),
            ForestError::SingleClass(1)
        );
        let odd = LabeledMatrix::from_trailing_label(&array![[1.0, 0.0], [2.0, 2.0]]).unwrap();
        assert_eq!(
            RandomForestClassifier::fit(&odd, params(1)).unwrap_err(),
            ForestError::NonBinaryLabel { row: 1, value: 2.0 }
        );
        let empty = LabeledMatrix::from_trailing_label(&ndarray::Array2::zeros((0, 3))).unwrap();
        assert!(matches!(
            RandomForestClassifier::fit(&empty, params(1)),
            Err(ForestError::EmptyInput { rows: 0, .. })
        ));
    }

    #[test]
    fn rejects_wrong_width_at_predict() {
        let forest = RandomForestClassifier::fit(&separable(), params(3)).unwrap();
        let err = forest.predict(array![[1.0, 2.0, 3.0]].view()).unwrap_err();
        assert_eq!(err, ForestError::FeatureMismatch { expected: 2, found: 3 });
    }
}
