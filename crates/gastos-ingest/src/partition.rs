//! Year/month partition keys and their on-disk paths
//!
//! A partition lives at `<layer>/<ano>/<mes>-<month name>/dados.parquet`,
//! identical in the bronze and silver layers.

use crate::coerce::{parse_integer, parse_year};
use crate::record::SpendingRecord;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File name of the single columnar file inside each partition directory
pub const PARTITION_FILE: &str = "dados.parquet";

const MONTH_NAMES: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

/// Month name used in partition paths, `None` outside 1-12
pub fn month_name(mes: u32) -> Option<&'static str> {
    let index = usize::try_from(mes).ok()?.checked_sub(1)?;
    MONTH_NAMES.get(index).copied()
}

/// (year, month) key of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub ano: i32,
    pub mes: u32,
}

impl PartitionKey {
    /// `None` when `mes` is not a calendar month
    pub fn new(ano: i32, mes: u32) -> Option<Self> {
        month_name(mes).map(|_| Self { ano, mes })
    }

    /// Key taken from the record's own `ano`/`mes` cells.
    ///
    /// The payment date is deliberately ignored.
    pub fn of_record(record: &SpendingRecord) -> Option<Self> {
        let ano = parse_year(record.ano.as_deref()?)?;
        let mes = u32::try_from(parse_integer(record.mes.as_deref()?)?).ok()?;
        Self::new(ano, mes)
    }

    pub fn month_name(&self) -> &'static str {
        // Constructors guarantee a valid month
        month_name(self.mes).unwrap_or("desconhecido")
    }

    /// Path of the partition directory relative to its layer
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.ano.to_string()).join(format!("{}-{}", self.mes, self.month_name()))
    }

    /// Path of the partition file relative to its layer
    pub fn relative_file(&self) -> PathBuf {
        self.relative_dir().join(PARTITION_FILE)
    }

    pub fn file_in(&self, layer_dir: &Path) -> PathBuf {
        layer_dir.join(self.relative_file())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.ano, self.mes)
    }
}

/// Every partition file under `layer_dir`, in sorted path order.
///
/// Staging files left by an interrupted write are ignored; a missing layer
/// yields nothing.
pub fn partition_files(layer_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(layer_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "parquet"))
        .collect()
}
