//! Bronze to silver transformation
//!
//! Each bronze partition is cleaned on its own and written to the same
//! relative path under the silver layer. A partition that fails is logged and
//! left untouched; the others still run.

use crate::batch::{BronzeTable, SilverTable};
use crate::coerce::{parse_amount, parse_date, parse_integer, parse_year};
use crate::config::DataLayout;
use crate::error::{IngestError, Result};
use crate::partition::partition_files;
use crate::quality::{QualityGate, QualityReport};
use crate::record::{
    RecordDetails, SilverRecord, SpendingRecord, TaxIdKind, CPF_CNPJ_FAVORECIDO,
    NORMALIZED_TEXT_COLUMNS,
};
use crate::table::TableStore;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Literal left behind by upstream exports for a missing text value
const MISSING_TEXT: &str = "NAN";

/// Outcome of one transformed partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    /// Partition directory relative to the layer, e.g. `2020/3-março`
    pub partition: String,
    pub original_rows: usize,
    pub final_rows: usize,
    pub removed_rows: usize,
    pub removed_pct: f64,
    pub quality: QualityReport,
}

impl PartitionReport {
    fn new(partition: String, original_rows: usize, final_rows: usize, quality: QualityReport) -> Self {
        let removed_rows = original_rows.saturating_sub(final_rows);
        let removed_pct = if original_rows == 0 {
            0.0
        } else {
            removed_rows as f64 * 100.0 / original_rows as f64
        };
        Self {
            partition,
            original_rows,
            final_rows,
            removed_rows,
            removed_pct,
            quality,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SilverSummary {
    pub partitions: Vec<PartitionReport>,
    /// Bronze files that could not be transformed
    pub failed: Vec<PathBuf>,
}

impl SilverSummary {
    pub fn original_rows(&self) -> usize {
        self.partitions.iter().map(|p| p.original_rows).sum()
    }

    pub fn final_rows(&self) -> usize {
        self.partitions.iter().map(|p| p.final_rows).sum()
    }
}

pub struct SilverTransformer<T> {
    bronze_dir: PathBuf,
    silver_dir: PathBuf,
    store: T,
    gate: QualityGate,
}

impl<T: TableStore> SilverTransformer<T> {
    pub fn new(layout: &DataLayout, store: T) -> Self {
        Self {
            bronze_dir: layout.bronze_dir(),
            silver_dir: layout.silver_dir(),
            store,
            gate: QualityGate::new(),
        }
    }

    /// Transform every bronze partition
    pub fn transform_all(&self) -> SilverSummary {
        let files = partition_files(&self.bronze_dir);
        info!(partitions = files.len(), "Starting silver transformation");

        let mut summary = SilverSummary::default();
        for path in files {
            match self.transform_partition(&path) {
                Ok(report) => summary.partitions.push(report),
                Err(e) => {
                    error!(partition = %path.display(), error = %e, "Failed to transform partition");
                    summary.failed.push(path);
                },
            }
        }

        info!(
            transformed = summary.partitions.len(),
            failed = summary.failed.len(),
            original_rows = summary.original_rows(),
            final_rows = summary.final_rows(),
            "Silver transformation finished"
        );
        summary
    }

    /// Clean one bronze file and write its silver counterpart
    pub fn transform_partition(&self, bronze_path: &Path) -> Result<PartitionReport> {
        let relative = bronze_path.strip_prefix(&self.bronze_dir).map_err(|_| {
            IngestError::schema(format!(
                "{} is outside the bronze layer {}",
                bronze_path.display(),
                self.bronze_dir.display()
            ))
        })?;
        let partition = relative
            .parent()
            .unwrap_or(relative)
            .display()
            .to_string();

        let bronze = BronzeTable::from_batch(&self.store.read_table(bronze_path)?)?;
        let original_rows = bronze.records.len();

        let silver = SilverTable::for_source(&bronze.columns, clean_records(&bronze));
        let batch = silver.to_batch()?;

        let quality = self.gate.evaluate(&batch);
        quality.log(&partition);

        self.store.write_table(&batch, &self.silver_dir.join(relative))?;

        let report = PartitionReport::new(partition, original_rows, silver.records.len(), quality);
        info!(
            partition = %report.partition,
            original_rows = report.original_rows,
            final_rows = report.final_rows,
            removed_rows = report.removed_rows,
            removed_pct = report.removed_pct,
            "Silver partition written"
        );
        Ok(report)
    }
}

/// Critical cells after coercion; the month is still unchecked
struct Coerced {
    ano: i32,
    mes: i64,
    valor: f64,
    data_pagamento: NaiveDate,
    details: RecordDetails,
}

/// Apply the cleaning rules, in order, to one bronze partition
pub fn clean_records(bronze: &BronzeTable) -> Vec<SilverRecord> {
    let classify_tax_ids = bronze.has_column(CPF_CNPJ_FAVORECIDO);

    let mut seen = HashSet::new();
    bronze
        .records
        .iter()
        .filter(|record| seen.insert(*record))
        .filter_map(coerce_record)
        .map(|mut row| {
            normalize_text(&mut row.details);
            row
        })
        .filter(|row| row.valor > 0.0 && (1..=12).contains(&row.mes))
        .filter_map(|row| {
            let mes = u32::try_from(row.mes).ok()?;
            Some(SilverRecord::new(row.ano, mes, row.valor, row.data_pagamento, row.details))
        })
        .map(|mut record| {
            if classify_tax_ids {
                classify_beneficiary(&mut record);
            }
            record
        })
        .collect()
}

/// `None` when a critical cell is missing or fails to parse
fn coerce_record(record: &SpendingRecord) -> Option<Coerced> {
    let ano = record.ano.as_deref()?;
    let mes = record.mes.as_deref()?;
    let valor = record.valor.as_deref()?;
    let data_pagamento = record.data_pagamento.as_deref()?;

    Some(Coerced {
        ano: parse_year(ano)?,
        mes: parse_integer(mes)?,
        valor: parse_amount(valor)?,
        data_pagamento: parse_date(data_pagamento)?,
        details: record.details.clone(),
    })
}

fn normalize_text(details: &mut RecordDetails) {
    for column in NORMALIZED_TEXT_COLUMNS {
        if let Some(slot) = details.slot_mut(column) {
            *slot = slot
                .take()
                .map(|value| value.trim().to_uppercase())
                .filter(|value| value != MISSING_TEXT);
        }
    }
}

fn classify_beneficiary(record: &mut SilverRecord) {
    let raw = record.details.cpf_cnpj_favorecido.as_deref().unwrap_or_default();
    let (digits, kind) = TaxIdKind::classify(raw);
    record.details.cpf_cnpj_favorecido = Some(digits);
    record.tipo_pessoa = Some(kind);
}
