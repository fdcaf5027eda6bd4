//! Resumable, rate-limit aware page collection
//!
//! [`Collector::collect`] walks pages `1..=max_pages` in order. Pages the
//! [`PageStore`] already holds are skipped, HTTP 429 waits and retries the
//! same page, any other failure abandons the page so that a later run picks
//! it up again.

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::page_store::PageStore;
use crate::source::PageSource;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one collection run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    /// Pages fetched and written in this run
    pub fetched: u32,
    /// Pages already on disk
    pub skipped: u32,
    /// Pages abandoned after an error
    pub failed: u32,
    /// 429 responses received
    pub rate_limited: u32,
    pub cancelled: bool,
}

enum Attempt {
    Saved,
    RateLimited,
    Failed,
}

/// Drives pagination against a [`PageSource`] and persists into a [`PageStore`]
pub struct Collector<S, P> {
    source: S,
    store: P,
    request_delay: Duration,
    rate_limit_delay: Duration,
    max_rate_limit_retries: Option<u32>,
    cancel: CancellationToken,
}

impl<S: PageSource, P: PageStore> Collector<S, P> {
    pub fn new(source: S, store: P, config: &PipelineConfig) -> Self {
        Self {
            source,
            store,
            request_delay: config.request_delay,
            rate_limit_delay: config.rate_limit_delay,
            max_rate_limit_retries: config.max_rate_limit_retries,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between pages and during waits once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Collect pages `1..=max_pages`.
    ///
    /// Never fails: page errors are logged and counted, and cancellation ends
    /// the run early with `cancelled` set.
    pub async fn collect(&self, max_pages: u32) -> CollectionSummary {
        let mut summary = CollectionSummary::default();
        info!(max_pages, "Starting collection");

        match self.run(max_pages, &mut summary).await {
            Ok(()) => {},
            Err(IngestError::Cancelled) => {
                summary.cancelled = true;
                warn!("Collection cancelled; pages written so far are kept");
            },
            Err(e) => error!(error = %e, "Collection stopped"),
        }

        info!(
            fetched = summary.fetched,
            skipped = summary.skipped,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            "Collection finished"
        );
        summary
    }

    async fn run(&self, max_pages: u32, summary: &mut CollectionSummary) -> Result<()> {
        let collected = self.store.collected_pages();
        let mut page = 1;
        let mut consecutive_429 = 0u32;

        while page <= max_pages {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            if collected.contains(&page) {
                info!(page, "Page already collected, skipping");
                summary.skipped += 1;
                page += 1;
                continue;
            }

            match self.attempt(page).await {
                Attempt::RateLimited => {
                    summary.rate_limited += 1;
                    consecutive_429 += 1;
                    if self.max_rate_limit_retries.is_some_and(|max| consecutive_429 > max) {
                        error!(page, attempts = consecutive_429, "Rate limit persisted, abandoning page");
                        summary.failed += 1;
                    } else {
                        warn!(
                            page,
                            wait_secs = self.rate_limit_delay.as_secs_f64(),
                            "Rate limited, waiting before retrying the same page"
                        );
                        self.pause(self.rate_limit_delay).await?;
                        continue;
                    }
                },
                Attempt::Saved => {
                    summary.fetched += 1;
                    page += 1;
                    consecutive_429 = 0;
                    self.pause(self.request_delay).await?;
                    continue;
                },
                Attempt::Failed => summary.failed += 1,
            }

            consecutive_429 = 0;
            page += 1;
        }

        Ok(())
    }

    async fn attempt(&self, page: u32) -> Attempt {
        info!(page, "Fetching page");
        let response = match self.source.fetch_page(page).await {
            Ok(response) => response,
            Err(e) => {
                error!(page, error = %e, "Page request failed");
                return Attempt::Failed;
            },
        };

        if response.is_rate_limited() {
            return Attempt::RateLimited;
        }
        if !response.is_success() {
            error!(page, status = response.status, "Page request returned an error status");
            return Attempt::Failed;
        }

        match self.persist(page, &response.body) {
            Ok(()) => {
                info!(page, "Page saved");
                Attempt::Saved
            },
            Err(e) => {
                error!(page, error = %e, "Failed to save page");
                Attempt::Failed
            },
        }
    }

    fn persist(&self, page: u32, body: &str) -> Result<()> {
        let json: Value = serde_json::from_str(body)?;
        self.store.save_page(page, &json)
    }

    /// Sleep for `delay` unless cancelled first
    async fn pause(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        debug!(delay_ms = delay.as_millis() as u64, "Waiting");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::page_store::FsPageStore;
    use crate::source::PageResponse;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PAGE_BODY: &str = r#"{"results": [{"ano": 2020, "mes": 1, "valor": "10.0"}]}"#;

    /// Replays scripted responses per page; unscripted pages succeed
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<HashMap<u32, VecDeque<Option<PageResponse>>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedSource {
        fn respond(self, page: u32, responses: Vec<Option<PageResponse>>) -> Self {
            self.script.lock().unwrap().insert(page, responses.into());
            self
        }

        fn calls(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'a> PageSource for &'a ScriptedSource {
        async fn fetch_page(&self, page: u32) -> Result<PageResponse> {
            self.calls.lock().unwrap().push(page);
            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(&page)
                .and_then(VecDeque::pop_front);
            match next {
                Some(Some(response)) => Ok(response),
                // transport failure
                Some(None) => Err(IngestError::Io(std::io::Error::other("connection reset"))),
                None => Ok(PageResponse::new(200, PAGE_BODY)),
            }
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            request_delay: Duration::from_millis(1_000),
            rate_limit_delay: Duration::from_secs(15),
            ..PipelineConfig::default()
        }
    }

    fn ok() -> Option<PageResponse> {
        Some(PageResponse::new(200, PAGE_BODY))
    }

    fn status(code: u16) -> Option<PageResponse> {
        Some(PageResponse::new(code, ""))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_same_page() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::default().respond(1, vec![status(429), status(429), ok()]);
        let collector = Collector::new(&source, FsPageStore::new(temp.path()), &config());

        let started = tokio::time::Instant::now();
        let summary = collector.collect(1).await;

        assert_eq!(source.calls(), vec![1, 1, 1]);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.rate_limited, 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(collector.store().collected_pages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_fetches_nothing() {
        let temp = TempDir::new().unwrap();
        let first = ScriptedSource::default();
        Collector::new(&first, FsPageStore::new(temp.path()), &config())
            .collect(3)
            .await;
        assert_eq!(first.calls(), vec![1, 2, 3]);

        let second = ScriptedSource::default();
        let summary = Collector::new(&second, FsPageStore::new(temp.path()), &config())
            .collect(3)
            .await;

        assert!(second.calls().is_empty());
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.fetched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_abandon_page_and_advance() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::default()
            .respond(1, vec![status(500)])
            .respond(2, vec![None])
            .respond(3, vec![Some(PageResponse::new(200, "not json"))]);
        let store = FsPageStore::new(temp.path());
        let collector = Collector::new(&source, store, &config());

        let summary = collector.collect(4).await;

        assert_eq!(source.calls(), vec![1, 2, 3, 4]);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.fetched, 1);
        assert_eq!(collector.store().collected_pages().into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_rate_limit_gives_up() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::default().respond(1, vec![status(429), status(429), status(429)]);
        let config = PipelineConfig {
            max_rate_limit_retries: Some(1),
            ..config()
        };
        let collector = Collector::new(&source, FsPageStore::new(temp.path()), &config);

        let summary = collector.collect(2).await;

        // one retry on page 1, then page 2 succeeds
        assert_eq!(source.calls(), vec![1, 1, 2]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fetched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_fetches_nothing() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::default();
        let token = CancellationToken::new();
        token.cancel();

        let summary = Collector::new(&source, FsPageStore::new(temp.path()), &config())
            .with_cancellation(token)
            .collect(3)
            .await;

        assert!(summary.cancelled);
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let temp = TempDir::new().unwrap();
        let source = ScriptedSource::default().respond(1, vec![status(429); 100]);
        let token = CancellationToken::new();
        let collector = Collector::new(&source, FsPageStore::new(temp.path()), &config())
            .with_cancellation(token.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            token.cancel();
        };
        let (summary, ()) = tokio::join!(collector.collect(1), canceller);

        assert!(summary.cancelled);
        // first attempt at t=0, second after the 15s backoff, cancelled at 20s
        assert_eq!(source.calls(), vec![1, 1]);
        assert_eq!(summary.fetched, 0);
    }
}
