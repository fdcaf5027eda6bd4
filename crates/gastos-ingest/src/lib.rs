//! Gastos Ingest Library
//!
//! Layered batch ETL for the federal direct-spending dataset:
//!
//! - **raw**: one JSON file per API page, collected with rate-limit backoff
//!   and resumed from whatever is already on disk
//! - **bronze**: every raw record, partitioned by year and month into parquet
//! - **silver**: deduplicated, typed and validated records with derived
//!   period and beneficiary columns, in the same partition layout
//!
//! # Example
//!
//! ```no_run
//! use gastos_ingest::{Pipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(PipelineConfig::from_env()?)?;
//!     pipeline.collect(CancellationToken::new()).await?;
//!     pipeline.silver();
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod coerce;
pub mod collector;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod page_store;
pub mod partition;
pub mod pipeline;
pub mod profile;
pub mod quality;
pub mod record;
pub mod silver;
pub mod source;
pub mod table;

pub use collector::{CollectionSummary, Collector};
pub use config::{DataLayout, PipelineConfig};
pub use consolidate::{ConsolidationSummary, RawConsolidator};
pub use error::{IngestError, Result};
pub use page_store::{FsPageStore, PageStore};
pub use pipeline::{CollectionReport, Pipeline};
pub use quality::{QualityGate, QualityReport};
pub use record::{SilverRecord, SpendingRecord, TaxIdKind};
pub use silver::{PartitionReport, SilverSummary, SilverTransformer};
pub use source::{HttpPageSource, PageResponse, PageSource};
pub use table::{ParquetTableStore, TableStore};
