//! End-to-end tests for the raw -> bronze -> silver pipeline
//!
//! The remote API is a wiremock server; every layer lives in a temp dir.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use gastos_ingest::batch::{BronzeTable, SilverTable};
use gastos_ingest::partition::{partition_files, PartitionKey};
use gastos_ingest::record::{format_ano_mes, quarter_of};
use gastos_ingest::{
    DataLayout, ParquetTableStore, Pipeline, PipelineConfig, SilverTransformer, SpendingRecord,
    TableStore, TaxIdKind,
};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn spending(ano: i64, mes: i64, valor: &str, data: &str) -> Value {
    json!({
        "ano": ano,
        "mes": mes,
        "valor": valor,
        "data_pagamento": data,
        "nome_orgao_superior": " Ministério da Educação ",
        "favorecido": "Fornecedor Ltda",
    })
}

fn with_tax_id(mut record: Value, id: &str) -> Value {
    record["cpf_cnpj_favorecido"] = json!(id);
    record
}

async fn mount_page(server: &MockServer, page: u32, results: Vec<Value>) {
    Mock::given(method("GET"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 5,
            "next": null,
            "results": results,
        })))
        .mount(server)
        .await;
}

fn config(server: &MockServer, data_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: data_dir.to_path_buf(),
        api_url: format!("{}/api/v1/dataset/gastos-diretos/gastos/data/", server.uri()),
        api_token: Some("test-token".to_string()),
        max_pages: 3,
        request_delay: Duration::ZERO,
        rate_limit_delay: Duration::from_millis(10),
        ..PipelineConfig::default()
    }
}

fn read_silver(layout: &DataLayout) -> Vec<(std::path::PathBuf, SilverTable)> {
    let store = ParquetTableStore::new();
    partition_files(&layout.silver_dir())
        .into_iter()
        .map(|path| {
            let table = SilverTable::from_batch(&store.read_table(&path).unwrap()).unwrap();
            (path, table)
        })
        .collect()
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    let duplicated = spending(2020, 1, "150.25", "2020-01-10");
    mount_page(
        &server,
        1,
        vec![
            duplicated.clone(),
            duplicated,
            spending(2020, 1, "-5", "2020-01-11"),
        ],
    )
    .await;

    // Throttle page 2 once before serving it
    Mock::given(method("GET"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        2,
        vec![
            with_tax_id(spending(2020, 2, "10", "2020-02-03"), "12.345.678/0001-99"),
            with_tax_id(spending(2020, 2, "20", "2020-02-04"), "123.456.789-00"),
        ],
    )
    .await;

    mount_page(
        &server,
        3,
        vec![
            json!({"ano": null, "mes": 1, "valor": "1", "data_pagamento": "2020-01-01"}),
            spending(2020, 1, "abc", "2020-01-12"),
        ],
    )
    .await;

    let pipeline = Pipeline::new(config(&server, temp.path())).unwrap();
    let layout = pipeline.layout().clone();

    let report = pipeline.collect(CancellationToken::new()).await.unwrap();
    assert_eq!(report.collection.fetched, 3);
    assert_eq!(report.collection.rate_limited, 1);

    let consolidation = report.consolidation.unwrap();
    assert_eq!(consolidation.pages_read, 3);
    assert_eq!(consolidation.records, 7);
    assert_eq!(consolidation.unpartitioned, 1);
    assert_eq!(consolidation.partitions_written, 2);

    for page in 1..=3 {
        let raw = std::fs::read_to_string(layout.raw_dir().join(format!("page_{}.json", page))).unwrap();
        assert!(raw.contains("Ministério da Educação"));
    }

    let bronze_path = PartitionKey::new(2020, 1).unwrap().file_in(&layout.bronze_dir());
    let bronze = BronzeTable::from_batch(&ParquetTableStore::new().read_table(&bronze_path).unwrap()).unwrap();
    assert_eq!(bronze.records.len(), 4);

    let summary = pipeline.silver();
    assert!(summary.failed.is_empty());
    assert_eq!(summary.original_rows(), 6);
    assert_eq!(summary.final_rows(), 3);

    let silver = read_silver(&layout);
    assert_eq!(silver.len(), 2);
    for (path, table) in &silver {
        for record in &table.records {
            assert!(record.valor > 0.0, "{}", path.display());
            assert!((1..=12).contains(&record.mes));
            assert_eq!(record.ano_mes, format_ano_mes(record.ano, record.mes));
            assert_eq!(record.trimestre, quarter_of(record.mes));
            assert_eq!(record.details.nome_orgao_superior.as_deref(), Some("MINISTÉRIO DA EDUCAÇÃO"));
        }
    }

    let january = &silver[0].1;
    assert!(silver[0].0.ends_with("2020/1-janeiro/dados.parquet"));
    assert_eq!(january.records.len(), 1);
    assert!(!january.has_tax_kind);

    let february = &silver[1].1;
    assert!(silver[1].0.ends_with("2020/2-fevereiro/dados.parquet"));
    let kinds: Vec<_> = february.records.iter().map(|r| r.tipo_pessoa).collect();
    assert_eq!(kinds, vec![Some(TaxIdKind::LegalEntity), Some(TaxIdKind::Individual)]);
}

#[tokio::test]
async fn test_rerun_skips_collected_pages() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    for page in 1..=3 {
        mount_page(&server, page, vec![spending(2021, 5, "1", "2021-05-05")]).await;
    }

    let pipeline = Pipeline::new(config(&server, temp.path())).unwrap();
    pipeline.collect(CancellationToken::new()).await.unwrap();
    let requests_after_first = server.received_requests().await.unwrap().len();
    assert_eq!(requests_after_first, 3);

    let report = pipeline.collect(CancellationToken::new()).await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), requests_after_first);
    assert_eq!(report.collection.skipped, 3);
    assert_eq!(report.collection.fetched, 0);
    // bronze is still rebuilt from the raw pages already on disk
    assert_eq!(report.consolidation.unwrap().records, 3);
}

#[tokio::test]
async fn test_failed_page_is_retried_by_next_run() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_page(&server, 1, vec![spending(2021, 5, "1", "2021-05-05")]).await;

    let config = PipelineConfig {
        max_pages: 1,
        ..config(&server, temp.path())
    };
    let pipeline = Pipeline::new(config).unwrap();

    let first = pipeline.collect(CancellationToken::new()).await.unwrap();
    assert_eq!(first.collection.failed, 1);
    assert!(!pipeline.layout().raw_dir().join("page_1.json").exists());

    let second = pipeline.collect(CancellationToken::new()).await.unwrap();
    assert_eq!(second.collection.fetched, 1);
    assert!(pipeline.layout().raw_dir().join("page_1.json").exists());
}

#[tokio::test]
async fn test_all_null_tax_id_is_classified_invalid() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let mut record = spending(2023, 4, "12.5", "2023-04-20");
    record["cpf_cnpj_favorecido"] = Value::Null;
    mount_page(&server, 1, vec![record.clone(), record]).await;

    let config = PipelineConfig {
        max_pages: 1,
        ..config(&server, temp.path())
    };
    let pipeline = Pipeline::new(config).unwrap();
    let layout = pipeline.layout().clone();
    pipeline.collect(CancellationToken::new()).await.unwrap();

    let bronze_path = PartitionKey::new(2023, 4).unwrap().file_in(&layout.bronze_dir());
    let bronze = BronzeTable::from_batch(&ParquetTableStore::new().read_table(&bronze_path).unwrap()).unwrap();
    assert!(bronze.has_column("cpf_cnpj_favorecido"));

    let summary = pipeline.silver();
    assert!(summary.failed.is_empty());

    let silver = read_silver(&layout);
    assert_eq!(silver.len(), 1);
    let table = &silver[0].1;
    assert!(table.has_tax_kind);
    assert_eq!(table.records.len(), 1);
    assert_eq!(table.records[0].tipo_pessoa, Some(TaxIdKind::Invalid));
}

#[test]
fn test_corrupted_partition_does_not_block_others() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    layout.prepare().unwrap();
    let store = ParquetTableStore::new();

    for (mes, data) in [(1, "2020-01-15"), (3, "2020-03-15")] {
        let record = SpendingRecord::from_json(&spending(2020, mes, "42", data)).unwrap();
        let batch = BronzeTable::from_records(vec![record]).to_batch().unwrap();
        let key = PartitionKey::new(2020, mes as u32).unwrap();
        store.write_table(&batch, &key.file_in(&layout.bronze_dir())).unwrap();
    }
    let corrupted = PartitionKey::new(2020, 2).unwrap().file_in(&layout.bronze_dir());
    std::fs::create_dir_all(corrupted.parent().unwrap()).unwrap();
    std::fs::write(&corrupted, b"PAR1 truncated").unwrap();

    let summary = SilverTransformer::new(&layout, ParquetTableStore::new()).transform_all();

    assert_eq!(summary.failed, vec![corrupted]);
    assert_eq!(summary.partitions.len(), 2);
    let written: Vec<_> = read_silver(&layout).into_iter().map(|(path, _)| path).collect();
    assert_eq!(
        written,
        vec![
            PartitionKey::new(2020, 1).unwrap().file_in(&layout.silver_dir()),
            PartitionKey::new(2020, 3).unwrap().file_in(&layout.silver_dir()),
        ]
    );
}
