//! File-backed storage for matrices and fitted objects.
//!
//! Matrices are `bincode`-encoded `Array2<f64>`; everything else is JSON.
//! Writes land in a temporary file next to the destination and are renamed
//! into place, so a crash never leaves a half-written artifact behind.

use std::{
    fs,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use ndarray::Array2;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure at a specific path.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Matrix (de)serialization failure.
    #[error("matrix codec error at {path}: {source}")]
    Matrix {
        /// Matrix file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: bincode::Error,
    },
    /// Object (de)serialization failure.
    #[error("json error at {path}: {source}")]
    Json {
        /// Object file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Stateless handle over the on-disk artifact layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactStore;

impl ArtifactStore {
    /// Creates a store handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Writes a numeric matrix.
    pub fn save_matrix(&self, path: impl AsRef<Path>, matrix: &Array2<f64>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let bytes = bincode::serialize(matrix).map_err(|source| StoreError::Matrix {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_atomic(path, &bytes)
    }

    /// Reads a numeric matrix written by [`Self::save_matrix`].
    pub fn load_matrix(&self, path: impl AsRef<Path>) -> Result<Array2<f64>, StoreError> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|err| StoreError::io(path, err))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(|source| StoreError::Matrix {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes any serializable object as pretty JSON.
    pub fn save_object<T: Serialize>(&self, path: impl AsRef<Path>, object: &T) -> Result<(), StoreError> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(object).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_atomic(path, &bytes)
    }

    /// Reads an object written by [`Self::save_object`].
    pub fn load_object<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> Result<T, StoreError> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|err| StoreError::io(path, err))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes `bytes` to a sibling temp file, syncs it, then renames it over `path`.
    pub fn write_atomic(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), StoreError> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|err| StoreError::io(&parent, err))?;
        let mut staged = NamedTempFile::new_in(&parent).map_err(|err| StoreError::io(&parent, err))?;
        staged
            .write_all(bytes)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|err| StoreError::io(staged.path(), err))?;
        staged
            .persist(path)
            .map_err(|err| StoreError::io(path, err.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        weight: f64,
    }

    #[test]
    fn matrix_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/train.bin");
        let store = ArtifactStore::new();
        let matrix = array![[1.0, 0.0, 1.0], [2.0, 1.0, 0.0]];
        store.save_matrix(&path, &matrix).unwrap();
        assert_eq!(store.load_matrix(&path).unwrap(), matrix);
    }

    #[test]
    fn overwrite_replaces_previous_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("object.json");
        let store = ArtifactStore::new();
        store
            .save_object(&path, &Sample { name: "old".into(), weight: 1.0 })
            .unwrap();
        store
            .save_object(&path, &Sample { name: "new".into(), weight: 2.0 })
            .unwrap();
        let loaded: Sample = store.load_object(&path).unwrap();
        assert_eq!(loaded.name, "new");
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let err = ArtifactStore::new().load_matrix(&path).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(err.to_string().contains("absent.bin"));
    }
}
