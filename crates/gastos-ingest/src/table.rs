//! Columnar table storage
//!
//! Layers above this module only see Arrow [`RecordBatch`]es; the
//! [`TableStore`] trait hides the file format. [`ParquetTableStore`] is the
//! production implementation.

use crate::error::Result;
use arrow::array::{RecordBatch, RecordBatchReader};
use arrow::compute::concat_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Read and write whole tables at a path
pub trait TableStore: Send + Sync {
    /// Load the complete table stored at `path` as one batch
    fn read_table(&self, path: &Path) -> Result<RecordBatch>;

    /// Replace whatever is stored at `path` with `batch`.
    ///
    /// Parent directories are created as needed.
    fn write_table(&self, batch: &RecordBatch, path: &Path) -> Result<()>;
}

/// Parquet files with snappy compression
#[derive(Debug, Clone, Default)]
pub struct ParquetTableStore {
    max_row_group_size: Option<usize>,
}

impl ParquetTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = Some(rows);
        self
    }

    fn writer_properties(&self) -> WriterProperties {
        let builder = WriterProperties::builder().set_compression(Compression::SNAPPY);
        match self.max_row_group_size {
            Some(rows) => builder.set_max_row_group_size(rows).build(),
            None => builder.build(),
        }
    }
}

impl TableStore for ParquetTableStore {
    fn read_table(&self, path: &Path) -> Result<RecordBatch> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;
        debug!(path = %path.display(), rows = batch.num_rows(), "Read table");
        Ok(batch)
    }

    fn write_table(&self, batch: &RecordBatch, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write beside the target and rename so readers never see half a file
        let staging = path.with_extension("parquet.tmp");
        let file = File::create(&staging)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(self.writer_properties()))?;
        writer.write(batch)?;
        writer.close()?;
        std::fs::rename(&staging, path)?;

        debug!(path = %path.display(), rows = batch.num_rows(), "Wrote table");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Int32Type, Schema};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_batch(rows: i32) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("mes", DataType::Int32, false),
            Field::new("favorecido", DataType::Utf8, true),
        ]));
        let months: Vec<i32> = (0..rows).map(|i| i % 12 + 1).collect();
        let names: Vec<Option<String>> = (0..rows)
            .map(|i| (i % 2 == 0).then(|| format!("FAVORECIDO {}", i)))
            .collect();
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(months)), Arc::new(StringArray::from(names))],
        )
        .unwrap()
    }

    #[test]
    fn test_write_creates_parents_and_reads_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bronze/2020/1-janeiro/dados.parquet");
        let store = ParquetTableStore::new();

        store.write_table(&sample_batch(5), &path).unwrap();
        let batch = store.read_table(&path).unwrap();

        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.column(0).as_primitive::<Int32Type>().value(4), 5);
        assert!(batch.column(1).is_null(1));
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dados.parquet");
        let store = ParquetTableStore::new();

        store.write_table(&sample_batch(10), &path).unwrap();
        store.write_table(&sample_batch(3), &path).unwrap();

        assert_eq!(store.read_table(&path).unwrap().num_rows(), 3);
    }

    #[test]
    fn test_multiple_row_groups_are_concatenated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dados.parquet");
        let store = ParquetTableStore::new().with_max_row_group_size(4);

        store.write_table(&sample_batch(10), &path).unwrap();
        let batch = store.read_table(&path).unwrap();

        assert_eq!(batch.num_rows(), 10);
        assert_eq!(batch.column(1).as_string::<i32>().value(8), "FAVORECIDO 8");
    }

    #[test]
    fn test_read_rejects_corrupted_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dados.parquet");
        std::fs::write(&path, b"definitely not parquet").unwrap();

        assert!(ParquetTableStore::new().read_table(&path).is_err());
    }
}
