//! Stage wiring for the two pipeline entry points
//!
//! `collect` runs collection then bronze consolidation; `silver` profiles the
//! bronze layer and builds silver from it. Creating the layer directories is
//! the only failure either surfaces.

use crate::collector::{CollectionSummary, Collector};
use crate::config::{DataLayout, PipelineConfig};
use crate::consolidate::{ConsolidationSummary, RawConsolidator};
use crate::error::Result;
use crate::page_store::FsPageStore;
use crate::profile::profile_bronze;
use crate::silver::{SilverSummary, SilverTransformer};
use crate::source::HttpPageSource;
use crate::table::ParquetTableStore;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collection: CollectionSummary,
    /// Not run when collection was cancelled
    pub consolidation: Option<ConsolidationSummary>,
}

pub struct Pipeline {
    config: PipelineConfig,
    layout: DataLayout,
    store: ParquetTableStore,
}

impl Pipeline {
    /// Validate `config` and create the raw, bronze and silver directories
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();
        layout.prepare()?;
        info!(root = %layout.root().display(), "Data layout ready");

        Ok(Self {
            config,
            layout,
            store: ParquetTableStore::new(),
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Collect up to `max_pages` pages, then rebuild bronze from every raw page
    pub async fn collect(&self, cancel: CancellationToken) -> Result<CollectionReport> {
        let source = HttpPageSource::new(&self.config)?;
        let collector = Collector::new(source, FsPageStore::new(self.layout.raw_dir()), &self.config)
            .with_cancellation(cancel);
        let collection = collector.collect(self.config.max_pages).await;

        if collection.cancelled {
            warn!("Skipping consolidation after cancelled collection");
            return Ok(CollectionReport {
                collection,
                consolidation: None,
            });
        }

        let consolidation = RawConsolidator::new(&self.layout, self.store.clone()).consolidate();
        Ok(CollectionReport {
            collection,
            consolidation: Some(consolidation),
        })
    }

    /// Profile bronze and transform every partition into silver
    pub fn silver(&self) -> SilverSummary {
        if let Some(profile) = profile_bronze(&self.store, &self.layout.bronze_dir()) {
            profile.log();
        }
        SilverTransformer::new(&self.layout, self.store.clone()).transform_all()
    }
}
