//! Spending record types
//!
//! The API returns loosely typed JSON objects. [`SpendingRecord`] names the
//! fields the pipeline knows about and keeps their raw cell text; any other
//! key is widened into [`RecordDetails::extra`] instead of being dropped.
//! [`SilverRecord`] is the cleaned, typed form produced by the silver stage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const ANO: &str = "ano";
pub const MES: &str = "mes";
pub const VALOR: &str = "valor";
pub const DATA_PAGAMENTO: &str = "data_pagamento";
pub const CPF_CNPJ_FAVORECIDO: &str = "cpf_cnpj_favorecido";
pub const ANO_MES: &str = "ano_mes";
pub const TRIMESTRE: &str = "trimestre";
pub const TIPO_PESSOA: &str = "tipo_pessoa";

/// Columns a record cannot be promoted without
pub const CRITICAL_COLUMNS: [&str; 4] = [ANO, MES, VALOR, DATA_PAGAMENTO];

/// Known descriptive columns, in canonical output order
pub const DETAIL_COLUMNS: [&str; 11] = [
    "codigo_orgao_superior",
    "nome_orgao_superior",
    "codigo_orgao_subordinado",
    "nome_orgao_subordinado",
    "codigo_unidade_gestora",
    "nome_unidade_gestora",
    "favorecido",
    CPF_CNPJ_FAVORECIDO,
    "numero_processo",
    "categoria",
    "origem_despesa",
];

/// Free-text columns trimmed and uppercased by the silver stage
pub const NORMALIZED_TEXT_COLUMNS: [&str; 5] = [
    "nome_orgao_superior",
    "nome_orgao_subordinado",
    "nome_unidade_gestora",
    "favorecido",
    "categoria",
];

/// Descriptive attributes shared by the bronze and silver record forms
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordDetails {
    pub codigo_orgao_superior: Option<String>,
    pub nome_orgao_superior: Option<String>,
    pub codigo_orgao_subordinado: Option<String>,
    pub nome_orgao_subordinado: Option<String>,
    pub codigo_unidade_gestora: Option<String>,
    pub nome_unidade_gestora: Option<String>,
    pub favorecido: Option<String>,
    pub cpf_cnpj_favorecido: Option<String>,
    pub numero_processo: Option<String>,
    pub categoria: Option<String>,
    pub origem_despesa: Option<String>,
    /// Fields the pipeline does not model, as cell text
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl RecordDetails {
    /// Cell text of a known detail column or an extra field
    pub fn get(&self, column: &str) -> Option<&str> {
        match self.slot(column) {
            Some(slot) => slot.as_deref(),
            None => self.extra.get(column).map(String::as_str),
        }
    }

    /// Mutable slot of a known detail column; `None` for unknown names
    pub fn slot_mut(&mut self, column: &str) -> Option<&mut Option<String>> {
        let slot = match column {
            "codigo_orgao_superior" => &mut self.codigo_orgao_superior,
            "nome_orgao_superior" => &mut self.nome_orgao_superior,
            "codigo_orgao_subordinado" => &mut self.codigo_orgao_subordinado,
            "nome_orgao_subordinado" => &mut self.nome_orgao_subordinado,
            "codigo_unidade_gestora" => &mut self.codigo_unidade_gestora,
            "nome_unidade_gestora" => &mut self.nome_unidade_gestora,
            "favorecido" => &mut self.favorecido,
            CPF_CNPJ_FAVORECIDO => &mut self.cpf_cnpj_favorecido,
            "numero_processo" => &mut self.numero_processo,
            "categoria" => &mut self.categoria,
            "origem_despesa" => &mut self.origem_despesa,
            _ => return None,
        };
        Some(slot)
    }

    fn slot(&self, column: &str) -> Option<&Option<String>> {
        let slot = match column {
            "codigo_orgao_superior" => &self.codigo_orgao_superior,
            "nome_orgao_superior" => &self.nome_orgao_superior,
            "codigo_orgao_subordinado" => &self.codigo_orgao_subordinado,
            "nome_orgao_subordinado" => &self.nome_orgao_subordinado,
            "codigo_unidade_gestora" => &self.codigo_unidade_gestora,
            "nome_unidade_gestora" => &self.nome_unidade_gestora,
            "favorecido" => &self.favorecido,
            CPF_CNPJ_FAVORECIDO => &self.cpf_cnpj_favorecido,
            "numero_processo" => &self.numero_processo,
            "categoria" => &self.categoria,
            "origem_despesa" => &self.origem_despesa,
            _ => return None,
        };
        Some(slot)
    }

    /// Store a value under a known column or as an extra field
    pub fn set(&mut self, column: &str, value: Option<String>) {
        match self.slot_mut(column) {
            Some(slot) => *slot = value,
            None => match value {
                Some(value) => {
                    self.extra.insert(column.to_string(), value);
                },
                None => {
                    self.extra.remove(column);
                },
            },
        }
    }
}

/// One spending row as collected, before any cleaning
///
/// Every cell is kept as text so that the bronze layer is a faithful copy of
/// the source; coercion happens in the silver stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpendingRecord {
    pub ano: Option<String>,
    pub mes: Option<String>,
    pub valor: Option<String>,
    pub data_pagamento: Option<String>,
    #[serde(flatten)]
    pub details: RecordDetails,
}

impl SpendingRecord {
    /// Build a record from one element of a page's `results` array.
    ///
    /// Returns `None` when the element is not a JSON object.
    pub fn from_json(value: &Value) -> Option<Self> {
        value.as_object().map(Self::from_object)
    }

    pub fn from_object(object: &Map<String, Value>) -> Self {
        let mut record = Self::default();
        for (key, value) in object {
            record.set(key, cell_text(value));
        }
        record
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        match column {
            ANO => self.ano.as_deref(),
            MES => self.mes.as_deref(),
            VALOR => self.valor.as_deref(),
            DATA_PAGAMENTO => self.data_pagamento.as_deref(),
            _ => self.details.get(column),
        }
    }

    pub fn set(&mut self, column: &str, value: Option<String>) {
        match column {
            ANO => self.ano = value,
            MES => self.mes = value,
            VALOR => self.valor = value,
            DATA_PAGAMENTO => self.data_pagamento = value,
            _ => self.details.set(column, value),
        }
    }
}

/// Render a JSON value as cell text; `null` is a missing cell.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}

/// Beneficiary type derived from the digits of its tax identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxIdKind {
    /// 14-digit CNPJ
    #[serde(rename = "PJ")]
    LegalEntity,
    /// 11-digit CPF
    #[serde(rename = "PF")]
    Individual,
    #[serde(rename = "INVALIDO")]
    Invalid,
}

impl TaxIdKind {
    /// Strip every non-digit character and classify by length.
    ///
    /// Returns the digit-only identifier alongside its kind.
    pub fn classify(raw: &str) -> (String, Self) {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let kind = match digits.len() {
            14 => TaxIdKind::LegalEntity,
            11 => TaxIdKind::Individual,
            _ => TaxIdKind::Invalid,
        };
        (digits, kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaxIdKind::LegalEntity => "PJ",
            TaxIdKind::Individual => "PF",
            TaxIdKind::Invalid => "INVALIDO",
        }
    }
}

impl std::fmt::Display for TaxIdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaxIdKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PJ" => Ok(TaxIdKind::LegalEntity),
            "PF" => Ok(TaxIdKind::Individual),
            "INVALIDO" => Ok(TaxIdKind::Invalid),
            other => Err(format!("unknown tax id kind '{}'", other)),
        }
    }
}

/// A cleaned, typed spending row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilverRecord {
    pub ano: i32,
    pub mes: u32,
    pub valor: f64,
    pub data_pagamento: NaiveDate,
    pub details: RecordDetails,
    /// "YYYY-MM"
    pub ano_mes: String,
    /// Quarter of `mes`, 1-4
    pub trimestre: u32,
    /// Set only when the source partition had a tax identifier column
    pub tipo_pessoa: Option<TaxIdKind>,
}

impl SilverRecord {
    pub fn new(ano: i32, mes: u32, valor: f64, data_pagamento: NaiveDate, details: RecordDetails) -> Self {
        Self {
            ano,
            mes,
            valor,
            data_pagamento,
            details,
            ano_mes: format_ano_mes(ano, mes),
            trimestre: quarter_of(mes),
            tipo_pessoa: None,
        }
    }
}

pub fn format_ano_mes(ano: i32, mes: u32) -> String {
    format!("{}-{:02}", ano, mes)
}

pub fn quarter_of(mes: u32) -> u32 {
    (mes.saturating_sub(1)) / 3 + 1
}
