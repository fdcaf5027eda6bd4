//! Data quality checks
//!
//! [`QualityGate::evaluate`] inspects a batch and tallies check outcomes. It
//! never mutates or rejects data; callers log the resulting
//! [`QualityReport`].

use crate::batch::days_to_date;
use crate::record::{ANO, CRITICAL_COLUMNS, DATA_PAGAMENTO, MES, VALOR};
use arrow::array::{Array, ArrayRef, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Date32Type, Float64Type, Int64Type};
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Descriptive statistics of the amount column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AmountStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Outcome of every check run against one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub rows: usize,
    /// Null count per critical column; an absent column counts every row
    pub critical_nulls: BTreeMap<String, usize>,
    /// Critical columns missing from the batch or not convertible to their type
    pub unavailable_columns: Vec<String>,
    pub non_positive_amounts: usize,
    pub months_out_of_range: usize,
    /// Rows whose `ano`/`mes` disagree with the year/month of `data_pagamento`
    pub period_mismatches: usize,
    pub amount_stats: Option<AmountStats>,
}

impl QualityReport {
    pub fn critical_columns_complete(&self) -> bool {
        self.unavailable_columns.is_empty() && self.critical_nulls.values().all(|&nulls| nulls == 0)
    }

    pub fn amounts_positive(&self) -> bool {
        self.non_positive_amounts == 0
    }

    pub fn months_valid(&self) -> bool {
        self.months_out_of_range == 0
    }

    pub fn periods_consistent(&self) -> bool {
        self.period_mismatches == 0
    }

    /// All blocking-grade checks passed; period mismatches are advisory
    pub fn passed(&self) -> bool {
        self.critical_columns_complete() && self.amounts_positive() && self.months_valid()
    }

    /// Emit one log line per check
    pub fn log(&self, partition: &str) {
        for (column, nulls) in &self.critical_nulls {
            if *nulls > 0 {
                warn!(partition, column = %column, nulls, "Quality check failed: nulls in critical column");
            } else {
                info!(partition, column = %column, "Quality check ok: no nulls");
            }
        }
        for column in &self.unavailable_columns {
            warn!(partition, column = %column, "Quality check failed: critical column unavailable");
        }

        if self.amounts_positive() {
            info!(partition, "Quality check ok: all amounts positive");
        } else {
            warn!(partition, count = self.non_positive_amounts, "Quality check failed: amounts <= 0");
        }

        if self.months_valid() {
            info!(partition, "Quality check ok: all months within 1-12");
        } else {
            warn!(partition, count = self.months_out_of_range, "Quality check failed: invalid months");
        }

        if self.periods_consistent() {
            info!(partition, "Quality check ok: ano/mes consistent with data_pagamento");
        } else {
            warn!(
                partition,
                count = self.period_mismatches,
                "Quality warning: ano/mes inconsistent with data_pagamento"
            );
        }

        if let Some(stats) = self.amount_stats {
            info!(
                partition,
                min = stats.min,
                max = stats.max,
                mean = stats.mean,
                "Amount statistics"
            );
        }
    }
}

/// Declarative checks over a batch of spending rows
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate;

impl QualityGate {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every check. Pure; performs no I/O.
    pub fn evaluate(&self, batch: &RecordBatch) -> QualityReport {
        let rows = batch.num_rows();
        let mut unavailable_columns = Vec::new();
        let mut critical_nulls = BTreeMap::new();

        for column in CRITICAL_COLUMNS {
            let nulls = match batch.column_by_name(column) {
                Some(array) => array.null_count(),
                None => {
                    unavailable_columns.push(column.to_string());
                    rows
                },
            };
            critical_nulls.insert(column.to_string(), nulls);
        }

        let mut typed = |column: &str, data_type: DataType| -> Option<ArrayRef> {
            let array = batch.column_by_name(column)?;
            match cast(array, &data_type) {
                Ok(array) => Some(array),
                Err(_) => {
                    unavailable_columns.push(column.to_string());
                    None
                },
            }
        };
        let anos = typed(ANO, DataType::Int64);
        let meses = typed(MES, DataType::Int64);
        let valores = typed(VALOR, DataType::Float64);
        let datas = typed(DATA_PAGAMENTO, DataType::Date32);

        let mut non_positive_amounts = 0;
        let mut amount_stats = None;
        if let Some(valores) = &valores {
            let values: Vec<f64> = valores.as_primitive::<Float64Type>().iter().flatten().collect();
            non_positive_amounts = values.iter().filter(|&&value| value <= 0.0).count();
            amount_stats = summarize(&values);
        }

        let months_out_of_range = meses
            .as_ref()
            .map(|meses| {
                meses
                    .as_primitive::<Int64Type>()
                    .iter()
                    .flatten()
                    .filter(|mes| !(1..=12).contains(mes))
                    .count()
            })
            .unwrap_or(0);

        let period_mismatches = match (&anos, &meses, &datas) {
            (Some(anos), Some(meses), Some(datas)) => {
                let anos = anos.as_primitive::<Int64Type>();
                let meses = meses.as_primitive::<Int64Type>();
                let datas = datas.as_primitive::<Date32Type>();
                (0..rows)
                    .filter(|&row| anos.is_valid(row) && meses.is_valid(row) && datas.is_valid(row))
                    .filter(|&row| match days_to_date(datas.value(row)) {
                        Some(date) => {
                            i64::from(date.year()) != anos.value(row)
                                || i64::from(date.month()) != meses.value(row)
                        },
                        None => true,
                    })
                    .count()
            },
            _ => 0,
        };

        QualityReport {
            rows,
            critical_nulls,
            unavailable_columns,
            non_positive_amounts,
            months_out_of_range,
            period_mismatches,
            amount_stats,
        }
    }
}

fn summarize(values: &[f64]) -> Option<AmountStats> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(AmountStats { min, max, mean })
}
