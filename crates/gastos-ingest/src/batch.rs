//! Conversions between record types and Arrow batches
//!
//! Bronze tables are all-text: one nullable `Utf8` column per field seen in
//! the partition. Silver tables carry typed critical columns followed by the
//! descriptive text columns and the derived period/beneficiary columns.

use crate::error::{IngestError, Result};
use crate::record::{
    RecordDetails, SilverRecord, SpendingRecord, TaxIdKind, ANO, ANO_MES,
    CPF_CNPJ_FAVORECIDO, CRITICAL_COLUMNS, DATA_PAGAMENTO, DETAIL_COLUMNS, MES, TIPO_PESSOA,
    TRIMESTRE, VALOR,
};
use arrow::array::{
    Array, ArrayRef, AsArray, Date32Array, Float64Array, Int32Array, RecordBatch, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Date32Type, Field, Float64Type, Int32Type, Schema};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub(crate) fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

// ============================================================================
// Bronze
// ============================================================================

/// Records of one bronze partition plus the columns its table carries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BronzeTable {
    /// Known columns in canonical order, then extra fields by name
    pub columns: Vec<String>,
    pub records: Vec<SpendingRecord>,
}

impl BronzeTable {
    /// Wrap records, deriving the column set from the values they carry
    pub fn from_records(records: Vec<SpendingRecord>) -> Self {
        Self::with_columns(records, &BTreeSet::new())
    }

    /// Wrap records, keeping every column in `seen` even when all of its
    /// cells are null.
    pub fn with_columns(records: Vec<SpendingRecord>, seen: &BTreeSet<String>) -> Self {
        let mut extras: BTreeSet<String> = seen
            .iter()
            .filter(|column| {
                !CRITICAL_COLUMNS.contains(&column.as_str()) && !DETAIL_COLUMNS.contains(&column.as_str())
            })
            .cloned()
            .collect();
        for record in &records {
            extras.extend(record.details.extra.keys().cloned());
        }

        let columns = CRITICAL_COLUMNS
            .iter()
            .chain(DETAIL_COLUMNS.iter())
            .filter(|column| {
                seen.contains(**column) || records.iter().any(|record| record.get(column).is_some())
            })
            .map(|column| column.to_string())
            .chain(extras)
            .collect();

        Self { columns, records }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column == name)
    }

    pub fn to_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|column| Field::new(column, DataType::Utf8, true))
            .collect();

        let arrays: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|column| {
                let values: StringArray =
                    self.records.iter().map(|record| record.get(column)).collect();
                Arc::new(values) as ArrayRef
            })
            .collect();

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Rebuild records from a bronze batch.
    ///
    /// Non-text columns are cast to text first so that tables written by
    /// other tools (integer `ano`, float `valor`) load the same way.
    pub fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let mut records = vec![SpendingRecord::default(); batch.num_rows()];
        let mut columns = Vec::with_capacity(batch.num_columns());

        for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
            let text = match array.data_type() {
                DataType::Utf8 => array.clone(),
                _ => cast(array, &DataType::Utf8)?,
            };
            let text = text.as_string_opt::<i32>().ok_or_else(|| {
                IngestError::schema(format!("column '{}' is not readable as text", field.name()))
            })?;

            for (record, value) in records.iter_mut().zip(text.iter()) {
                if let Some(value) = value {
                    record.set(field.name(), Some(value.to_string()));
                }
            }
            columns.push(field.name().clone());
        }

        Ok(Self { columns, records })
    }
}

// ============================================================================
// Silver
// ============================================================================

/// Columns computed by the silver stage; upstream fields with these names
/// are not carried over
const DERIVED_COLUMNS: [&str; 3] = [ANO_MES, TRIMESTRE, TIPO_PESSOA];

/// Cleaned records of one partition and the layout of their table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SilverTable {
    /// Descriptive columns (known details and extras) after the critical ones
    pub detail_columns: Vec<String>,
    /// Whether the `tipo_pessoa` column is present
    pub has_tax_kind: bool,
    pub records: Vec<SilverRecord>,
}

impl SilverTable {
    /// Silver layout derived from the columns of the bronze source
    pub fn for_source(source_columns: &[String], records: Vec<SilverRecord>) -> Self {
        let detail_columns = source_columns
            .iter()
            .filter(|column| {
                !CRITICAL_COLUMNS.contains(&column.as_str())
                    && !DERIVED_COLUMNS.contains(&column.as_str())
            })
            .cloned()
            .collect();
        Self {
            detail_columns,
            has_tax_kind: source_columns.iter().any(|column| column == CPF_CNPJ_FAVORECIDO),
            records,
        }
    }

    pub fn schema(&self) -> Schema {
        let mut fields = vec![
            Field::new(ANO, DataType::Int32, false),
            Field::new(MES, DataType::Int32, false),
            Field::new(VALOR, DataType::Float64, false),
            Field::new(DATA_PAGAMENTO, DataType::Date32, false),
        ];
        fields.extend(
            self.detail_columns
                .iter()
                .map(|column| Field::new(column, DataType::Utf8, true)),
        );
        fields.push(Field::new(ANO_MES, DataType::Utf8, false));
        fields.push(Field::new(TRIMESTRE, DataType::Int32, false));
        if self.has_tax_kind {
            fields.push(Field::new(TIPO_PESSOA, DataType::Utf8, true));
        }
        Schema::new(fields)
    }

    pub fn to_batch(&self) -> Result<RecordBatch> {
        let records = &self.records;
        let month = |record: &SilverRecord| i32::try_from(record.mes).unwrap_or(i32::MAX);
        let quarter = |record: &SilverRecord| i32::try_from(record.trimestre).unwrap_or(i32::MAX);

        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(records.iter().map(|r| Some(r.ano)).collect::<Int32Array>()),
            Arc::new(records.iter().map(|r| Some(month(r))).collect::<Int32Array>()),
            Arc::new(records.iter().map(|r| Some(r.valor)).collect::<Float64Array>()),
            Arc::new(
                records
                    .iter()
                    .map(|r| Some(date_to_days(r.data_pagamento)))
                    .collect::<Date32Array>(),
            ),
        ];
        for column in &self.detail_columns {
            let values: StringArray = records.iter().map(|r| r.details.get(column)).collect();
            arrays.push(Arc::new(values));
        }
        arrays.push(Arc::new(
            records
                .iter()
                .map(|r| Some(r.ano_mes.as_str()))
                .collect::<StringArray>(),
        ));
        arrays.push(Arc::new(records.iter().map(|r| Some(quarter(r))).collect::<Int32Array>()));
        if self.has_tax_kind {
            arrays.push(Arc::new(
                records
                    .iter()
                    .map(|r| r.tipo_pessoa.map(TaxIdKind::as_str))
                    .collect::<StringArray>(),
            ));
        }

        Ok(RecordBatch::try_new(Arc::new(self.schema()), arrays)?)
    }

    /// Rebuild typed records from a silver batch
    pub fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let anos = primitive_column::<Int32Type>(batch, ANO)?;
        let meses = primitive_column::<Int32Type>(batch, MES)?;
        let valores = primitive_column::<Float64Type>(batch, VALOR)?;
        let datas = primitive_column::<Date32Type>(batch, DATA_PAGAMENTO)?;
        let ano_mes = string_column(batch, ANO_MES)?;
        let trimestres = primitive_column::<Int32Type>(batch, TRIMESTRE)?;
        let tipo_pessoa = batch
            .column_by_name(TIPO_PESSOA)
            .map(|_| string_column(batch, TIPO_PESSOA))
            .transpose()?;

        let detail_columns: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .filter(|name| {
                !CRITICAL_COLUMNS.contains(&name.as_str()) && !DERIVED_COLUMNS.contains(&name.as_str())
            })
            .collect();
        let details = detail_columns
            .iter()
            .map(|column| string_column(batch, column).map(|array| (column, array)))
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let mut record_details = RecordDetails::default();
            for (column, array) in &details {
                if array.is_valid(row) {
                    record_details.set(column, Some(array.value(row).to_string()));
                }
            }

            let mes = u32::try_from(meses.value(row))
                .map_err(|_| IngestError::schema(format!("negative month at row {}", row)))?;
            let data_pagamento = days_to_date(datas.value(row))
                .ok_or_else(|| IngestError::schema(format!("date out of range at row {}", row)))?;
            let tipo = match &tipo_pessoa {
                Some(array) if array.is_valid(row) => {
                    Some(array.value(row).parse::<TaxIdKind>().map_err(IngestError::schema)?)
                },
                _ => None,
            };

            records.push(SilverRecord {
                ano: anos.value(row),
                mes,
                valor: valores.value(row),
                data_pagamento,
                details: record_details,
                ano_mes: ano_mes.value(row).to_string(),
                trimestre: u32::try_from(trimestres.value(row)).unwrap_or_default(),
                tipo_pessoa: tipo,
            });
        }

        Ok(Self {
            detail_columns,
            has_tax_kind: tipo_pessoa.is_some(),
            records,
        })
    }
}

fn primitive_column<'a, T: arrow::datatypes::ArrowPrimitiveType>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a arrow::array::PrimitiveArray<T>> {
    batch
        .column_by_name(name)
        .and_then(|array| array.as_primitive_opt::<T>())
        .ok_or_else(|| IngestError::schema(format!("missing or mistyped column '{}'", name)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|array| array.as_string_opt::<i32>())
        .ok_or_else(|| IngestError::schema(format!("missing or mistyped column '{}'", name)))
}
