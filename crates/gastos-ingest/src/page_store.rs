//! Raw page persistence and the "already collected" ledger
//!
//! Existence of a page file is the only resumption marker. The [`PageStore`]
//! trait keeps that decision out of the collector so that another ledger
//! (a manifest, a key-value index) can be swapped in.

use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const PAGE_PREFIX: &str = "page_";
const PAGE_EXTENSION: &str = "json";

/// Ledger and sink for collected pages
pub trait PageStore: Send + Sync {
    /// Page numbers already persisted. Never fails; an unreadable backing
    /// store reads as empty.
    fn collected_pages(&self) -> BTreeSet<u32>;

    /// Persist one page body. A stored page is never rewritten by the
    /// collector.
    fn save_page(&self, page: u32, body: &Value) -> Result<()>;
}

/// Pages stored as `raw/page_<n>.json`
#[derive(Debug, Clone)]
pub struct FsPageStore {
    raw_dir: PathBuf,
}

impl FsPageStore {
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.raw_dir.join(format!("{}{}.{}", PAGE_PREFIX, page, PAGE_EXTENSION))
    }
}

impl PageStore for FsPageStore {
    fn collected_pages(&self) -> BTreeSet<u32> {
        page_files(&self.raw_dir)
            .iter()
            .filter_map(|path| page_number(path))
            .collect()
    }

    fn save_page(&self, page: u32, body: &Value) -> Result<()> {
        let path = self.page_path(page);
        let json = serde_json::to_string_pretty(body)?;
        std::fs::write(&path, json)?;
        debug!(page, path = %path.display(), "Saved raw page");
        Ok(())
    }
}

/// Every `page_*.json` file in `raw_dir`, sorted by file name.
///
/// A missing or unreadable directory yields no files.
pub fn page_files(raw_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(raw_dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_page_file(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

fn is_page_file(path: &Path) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(PAGE_PREFIX));
    has_prefix && path.extension().is_some_and(|ext| ext == PAGE_EXTENSION)
}

/// Trailing integer of a page file stem (`page_12.json` -> 12)
pub fn page_number(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.rsplit('_').next()?.parse().ok()
}
