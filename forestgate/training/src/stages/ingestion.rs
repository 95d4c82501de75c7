use anyhow::{ensure, Context, Result};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use shared_logging::LogLevel;

use super::{Stage, StageName};
use crate::{
    artifact::DataIngestionArtifact,
    config::{ArtifactLayout, IngestionConfig},
    store::ArtifactStore,
    tabular::Table,
    telemetry::PipelineTelemetry,
};

/// Reads the flat record export and splits it into train and test CSVs.
#[derive(Debug, Clone)]
pub struct DataIngestion {
    config: IngestionConfig,
    layout: ArtifactLayout,
    store: ArtifactStore,
    telemetry: PipelineTelemetry,
}

impl DataIngestion {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: IngestionConfig, layout: ArtifactLayout, store: ArtifactStore) -> Self {
        Self {
            config,
            layout,
            store,
            telemetry: PipelineTelemetry::disabled(StageName::DataIngestion.as_str()),
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Shuffled row indices, test rows first. The test split holds
    /// `ceil(rows * test_ratio)` rows, clamped so neither split is empty.
    fn split_indices(&self, rows: usize) -> (Vec<usize>, Vec<usize>) {
        let mut order: Vec<usize> = (0..rows).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.config.seed));
        let wanted = (rows as f64 * self.config.test_ratio).ceil() as usize;
        let test_rows = wanted.clamp(1, rows - 1);
        let train = order.split_off(test_rows);
        (train, order)
    }
}

impl Stage<()> for DataIngestion {
    type Output = DataIngestionArtifact;

    fn name(&self) -> StageName {
        StageName::DataIngestion
    }

    fn run(&self, _input: &()) -> Result<DataIngestionArtifact> {
        let source = &self.config.source_path;
        let records = Table::read_csv(source)
            .with_context(|| format!("reading record export {}", source.display()))?;
        ensure!(
            records.len() >= 2,
            "record export {} has {} row(s); need at least 2 to split",
            source.display(),
            records.len()
        );

        let artifact = DataIngestionArtifact {
            feature_store_file_path: self.layout.feature_store_file(),
            trained_file_path: self.layout.train_file(),
            test_file_path: self.layout.test_file(),
        };
        records.write_csv(&self.store, &artifact.feature_store_file_path)?;

        let (train_rows, test_rows) = self.split_indices(records.len());
        records
            .select_rows(&train_rows)
            .write_csv(&self.store, &artifact.trained_file_path)?;
        records
            .select_rows(&test_rows)
            .write_csv(&self.store, &artifact.test_file_path)?;

        self.telemetry.note(
            LogLevel::Info,
            "records split into train and test",
            json!({
                "source": source.display().to_string(),
                "rows": records.len(),
                "train_rows": train_rows.len(),
                "test_rows": test_rows.len(),
            }),
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn export(dir: &std::path::Path, rows: usize) -> std::path::PathBuf {
        let path = dir.join("export.csv");
        let mut body = String::from("id,Age,Response\n");
        for row in 0..rows {
            body.push_str(&format!("{row},{},{}\n", 20 + row, row % 2));
        }
        fs::write(&path, body).unwrap();
        path
    }

    fn stage(dir: &std::path::Path, rows: usize) -> DataIngestion {
        DataIngestion::new(
            IngestionConfig {
                source_path: export(dir, rows),
                test_ratio: 0.25,
                seed: 7,
            },
            ArtifactLayout::new(dir.join("artifact")),
            ArtifactStore::new(),
        )
    }

    #[test]
    fn splits_rows_without_loss() {
        let dir = tempdir().unwrap();
        let artifact = stage(dir.path(), 10).run(&()).unwrap();
        let train = Table::read_csv(&artifact.trained_file_path).unwrap();
        let test = Table::read_csv(&artifact.test_file_path).unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 7);
        let mut ids: Vec<String> = train
            .column("id")
            .unwrap()
            .chain(test.column("id").unwrap())
            .map(str::to_owned)
            .collect();
        ids.sort_by_key(|id| id.parse::<usize>().unwrap());
        assert_eq!(ids, (0..10).map(|id| id.to_string()).collect::<Vec<_>>());
        assert_eq!(Table::read_csv(&artifact.feature_store_file_path).unwrap().len(), 10);
    }

    #[test]
    fn split_is_seeded() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let a = stage(first.path(), 12).run(&()).unwrap();
        let b = stage(second.path(), 12).run(&()).unwrap();
        assert_eq!(
            fs::read_to_string(a.test_file_path).unwrap(),
            fs::read_to_string(b.test_file_path).unwrap()
        );
    }

    #[test]
    fn tiny_exports_are_refused() {
        let dir = tempdir().unwrap();
        let err = stage(dir.path(), 1).run(&()).unwrap_err();
        assert!(err.to_string().contains("need at least 2"));
    }
}
