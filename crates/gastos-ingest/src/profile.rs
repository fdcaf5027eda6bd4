//! Exploratory profile of the bronze layer
//!
//! Run ahead of the silver stage so the logs show what the cleaning rules are
//! about to work on. Only the first partition is inspected.

use crate::partition::partition_files;
use crate::record::{CPF_CNPJ_FAVORECIDO, CRITICAL_COLUMNS, DETAIL_COLUMNS};
use crate::table::TableStore;
use arrow::array::Array;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const HIGH_RELEVANCE_COLUMNS: [&str; 5] = [
    "codigo_orgao_superior",
    "nome_orgao_superior",
    "favorecido",
    CPF_CNPJ_FAVORECIDO,
    "categoria",
];

/// Business relevance of a column for spending analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Critical,
    High,
    Medium,
    Unclassified,
}

impl Relevance {
    pub fn of_column(name: &str) -> Self {
        if CRITICAL_COLUMNS.contains(&name) {
            Relevance::Critical
        } else if HIGH_RELEVANCE_COLUMNS.contains(&name) {
            Relevance::High
        } else if DETAIL_COLUMNS.contains(&name) {
            Relevance::Medium
        } else {
            Relevance::Unclassified
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: String,
    pub nulls: usize,
    pub null_pct: f64,
    pub relevance: Relevance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BronzeProfile {
    /// Number of partition files in the layer
    pub files: usize,
    /// File the column profile was taken from
    pub sample: PathBuf,
    pub rows: usize,
    pub columns: Vec<ColumnProfile>,
}

impl BronzeProfile {
    pub fn columns_with(&self, relevance: Relevance) -> impl Iterator<Item = &ColumnProfile> {
        self.columns.iter().filter(move |column| column.relevance == relevance)
    }

    pub fn log(&self) {
        info!(
            files = self.files,
            sample = %self.sample.display(),
            rows = self.rows,
            columns = self.columns.len(),
            "Bronze profile"
        );
        for column in &self.columns {
            info!(
                column = %column.name,
                data_type = %column.data_type,
                nulls = column.nulls,
                null_pct = column.null_pct,
                relevance = ?column.relevance,
                "Bronze column"
            );
        }
        let missing: Vec<&str> = CRITICAL_COLUMNS
            .iter()
            .copied()
            .filter(|name| !self.columns.iter().any(|column| column.name == *name))
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "Critical columns absent from bronze sample");
        }
    }
}

/// Profile the first bronze partition in sorted order.
///
/// `None` when the layer is empty or the sample cannot be read.
pub fn profile_bronze<T: TableStore>(store: &T, bronze_dir: &Path) -> Option<BronzeProfile> {
    let files = partition_files(bronze_dir);
    let Some(sample) = files.first() else {
        warn!(bronze_dir = %bronze_dir.display(), "No bronze partitions to profile");
        return None;
    };

    let batch = match store.read_table(sample) {
        Ok(batch) => batch,
        Err(e) => {
            error!(sample = %sample.display(), error = %e, "Failed to read bronze sample");
            return None;
        },
    };

    let rows = batch.num_rows();
    let columns = batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| {
            let nulls = array.null_count();
            ColumnProfile {
                name: field.name().clone(),
                data_type: field.data_type().to_string(),
                nulls,
                null_pct: if rows == 0 {
                    0.0
                } else {
                    nulls as f64 * 100.0 / rows as f64
                },
                relevance: Relevance::of_column(field.name()),
            }
        })
        .collect();

    Some(BronzeProfile {
        files: files.len(),
        sample: sample.clone(),
        rows,
        columns,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::batch::BronzeTable;
    use crate::record::SpendingRecord;
    use crate::table::ParquetTableStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_relevance_classes() {
        assert_eq!(Relevance::of_column("valor"), Relevance::Critical);
        assert_eq!(Relevance::of_column("favorecido"), Relevance::High);
        assert_eq!(Relevance::of_column("origem_despesa"), Relevance::Medium);
        assert_eq!(Relevance::of_column("elemento_despesa"), Relevance::Unclassified);
    }

    #[test]
    fn test_empty_layer_has_no_profile() {
        let temp = TempDir::new().unwrap();
        assert!(profile_bronze(&ParquetTableStore::new(), temp.path()).is_none());
    }

    #[test]
    fn test_profile_counts_nulls_in_first_partition() {
        let temp = TempDir::new().unwrap();
        let store = ParquetTableStore::new();
        let records = vec![
            json!({"ano": "2020", "mes": "1", "valor": "1", "favorecido": "A"}),
            json!({"ano": "2020", "mes": "1", "valor": "2"}),
            json!({"ano": "2020", "mes": "1", "valor": "3", "obs": "x"}),
            json!({"ano": "2020", "mes": "1", "valor": "4"}),
        ];
        let table = BronzeTable::from_records(
            records.iter().map(|r| SpendingRecord::from_json(r).unwrap()).collect(),
        );
        let batch = table.to_batch().unwrap();
        store.write_table(&batch, &temp.path().join("2020/1-janeiro/dados.parquet")).unwrap();
        store.write_table(&batch, &temp.path().join("2020/2-fevereiro/dados.parquet")).unwrap();

        let profile = profile_bronze(&store, temp.path()).unwrap();

        assert_eq!(profile.files, 2);
        assert!(profile.sample.ends_with("2020/1-janeiro/dados.parquet"));
        assert_eq!(profile.rows, 4);
        let favorecido = profile.columns.iter().find(|c| c.name == "favorecido").unwrap();
        assert_eq!(favorecido.nulls, 3);
        assert_eq!(favorecido.null_pct, 75.0);
        assert_eq!(profile.columns_with(Relevance::Critical).count(), 3);
        assert_eq!(profile.columns_with(Relevance::Unclassified).count(), 1);
    }
}
