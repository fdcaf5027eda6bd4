//! Raw to bronze consolidation
//!
//! Every raw page is merged into one record set, split by the records' own
//! `ano`/`mes`, and each partition is rewritten in full.

use crate::batch::BronzeTable;
use crate::config::DataLayout;
use crate::error::Result;
use crate::page_store::page_files;
use crate::partition::PartitionKey;
use crate::record::SpendingRecord;
use crate::table::TableStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Counters for one consolidation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationSummary {
    pub pages_read: usize,
    /// Page files that could not be read or parsed
    pub pages_skipped: usize,
    pub records: usize,
    /// Records without a usable year/month, left out of bronze
    pub unpartitioned: usize,
    pub partitions_written: usize,
    pub partitions_failed: usize,
}

pub struct RawConsolidator<T> {
    raw_dir: PathBuf,
    bronze_dir: PathBuf,
    store: T,
}

impl<T: TableStore> RawConsolidator<T> {
    pub fn new(layout: &DataLayout, store: T) -> Self {
        Self {
            raw_dir: layout.raw_dir(),
            bronze_dir: layout.bronze_dir(),
            store,
        }
    }

    /// Rebuild every bronze partition that the raw pages contain.
    ///
    /// Unreadable pages and failed partition writes are logged and counted;
    /// they never stop the run.
    pub fn consolidate(&self) -> ConsolidationSummary {
        let mut summary = ConsolidationSummary::default();
        let mut records = Vec::new();
        let mut columns = BTreeSet::new();

        for path in page_files(&self.raw_dir) {
            match read_page(&path) {
                Ok(page) => {
                    debug!(page = %path.display(), records = page.records.len(), "Read raw page");
                    summary.pages_read += 1;
                    records.extend(page.records);
                    columns.extend(page.columns);
                },
                Err(e) => {
                    warn!(page = %path.display(), error = %e, "Skipping unreadable raw page");
                    summary.pages_skipped += 1;
                },
            }
        }

        summary.records = records.len();
        if records.is_empty() {
            info!(raw_dir = %self.raw_dir.display(), "No records to consolidate");
            return summary;
        }
        info!(pages = summary.pages_read, records = summary.records, "Consolidating raw pages");

        let mut partitions: BTreeMap<PartitionKey, Vec<SpendingRecord>> = BTreeMap::new();
        for record in records {
            match PartitionKey::of_record(&record) {
                Some(key) => partitions.entry(key).or_default().push(record),
                None => summary.unpartitioned += 1,
            }
        }
        if summary.unpartitioned > 0 {
            warn!(
                count = summary.unpartitioned,
                "Records without a valid ano/mes were left out of bronze"
            );
        }

        for (key, records) in partitions {
            let path = key.file_in(&self.bronze_dir);
            let rows = records.len();
            match self.write_partition(records, &columns, &path) {
                Ok(()) => {
                    info!(partition = %key, rows, path = %path.display(), "Bronze partition written");
                    summary.partitions_written += 1;
                },
                Err(e) => {
                    error!(partition = %key, error = %e, "Failed to write bronze partition");
                    summary.partitions_failed += 1;
                },
            }
        }

        info!(
            written = summary.partitions_written,
            failed = summary.partitions_failed,
            "Consolidation finished"
        );
        summary
    }

    fn write_partition(
        &self,
        records: Vec<SpendingRecord>,
        columns: &BTreeSet<String>,
        path: &Path,
    ) -> Result<()> {
        let batch = BronzeTable::with_columns(records, columns).to_batch()?;
        self.store.write_table(&batch, path)
    }
}

/// Records of one raw page plus every key they carry, null-valued ones
/// included
#[derive(Debug, Default)]
struct RawPage {
    records: Vec<SpendingRecord>,
    columns: BTreeSet<String>,
}

/// A page without `results` has no records
fn read_page(path: &Path) -> Result<RawPage> {
    let text = std::fs::read_to_string(path)?;
    let page: Value = serde_json::from_str(&text)?;

    let Some(results) = page.get("results").and_then(Value::as_array) else {
        return Ok(RawPage::default());
    };

    let mut raw = RawPage::default();
    for object in results.iter().filter_map(Value::as_object) {
        raw.columns.extend(object.keys().cloned());
        raw.records.push(SpendingRecord::from_object(object));
    }
    Ok(raw)
}
