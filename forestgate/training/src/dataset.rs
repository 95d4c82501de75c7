use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Shape problems found while splitting a raw matrix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    /// Fewer than two columns: no room for features plus a label.
    #[error("matrix has {0} column(s); need at least one feature and a label")]
    MissingLabelColumn(usize),
    /// Feature rows and label count disagree.
    #[error("{features} feature rows but {labels} labels")]
    LengthMismatch {
        /// Feature row count.
        features: usize,
        /// Label count.
        labels: usize,
    },
}

/// Features and labels held apart, so nothing downstream slices columns by position.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    features: Array2<f64>,
    labels: Array1<f64>,
}

impl LabeledMatrix {
    /// Pairs a feature matrix with its labels.
    pub fn new(features: Array2<f64>, labels: Array1<f64>) -> Result<Self, DatasetError> {
        if features.nrows() != labels.len() {
            return Err(DatasetError::LengthMismatch {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    /// Splits a raw matrix whose last column is the label.
    pub fn from_trailing_label(raw: &Array2<f64>) -> Result<Self, DatasetError> {
        let width = raw.ncols();
        if width < 2 {
            return Err(DatasetError::MissingLabelColumn(width));
        }
        Ok(Self {
            features: raw.slice(s![.., ..width - 1]).to_owned(),
            labels: raw.column(width - 1).to_owned(),
        })
    }

    /// Re-joins features and labels into the on-disk layout.
    #[must_use]
    pub fn to_trailing_label(&self) -> Array2<f64> {
        let mut raw = Array2::zeros((self.n_samples(), self.n_features() + 1));
        raw.slice_mut(s![.., ..self.n_features()]).assign(&self.features);
        raw.column_mut(self.n_features()).assign(&self.labels);
        raw
    }

    /// Feature matrix, one row per sample.
    #[must_use]
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// Label vector.
    #[must_use]
    pub fn labels(&self) -> ArrayView1<'_, f64> {
        self.labels.view()
    }

    /// Number of samples.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    /// Number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.features.len_of(Axis(1))
    }

    /// True when there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn splits_trailing_label() {
        let raw = array![[1.0, 0.0, 1.0], [2.0, 1.0, 0.0]];
        let data = LabeledMatrix::from_trailing_label(&raw).unwrap();
        assert_eq!(data.features(), array![[1.0, 0.0], [2.0, 1.0]]);
        assert_eq!(data.labels(), array![1.0, 0.0]);
        assert_eq!(data.to_trailing_label(), raw);
    }

    #[test]
    fn rejects_label_only_matrix() {
        let raw = array![[1.0], [0.0]];
        assert_eq!(
            LabeledMatrix::from_trailing_label(&raw).unwrap_err(),
            DatasetError::MissingLabelColumn(1)
        );
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = LabeledMatrix::new(array![[1.0], [2.0]], array![1.0]).unwrap_err();
        assert_eq!(err, DatasetError::LengthMismatch { features: 2, labels: 1 });
    }
}
