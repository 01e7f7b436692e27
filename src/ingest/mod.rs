// src/ingest/mod.rs
pub mod config;
pub mod error;
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod types;

use std::sync::Arc;

use chrono::Local;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;

use crate::ingest::error::IngestError;
use crate::ingest::normalize::normalize_entry;
use crate::ingest::store::StoreGateway;
use crate::ingest::types::{
    EntryOutcome, FeedFetcher, FeedSource, FeedStats, FetchOutcome, RawEntry, RunStats,
};

pub use crate::ingest::normalize::{normalize_date, normalize_text};

const LOG_TITLE_CHARS: usize = 50;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingest passes.");
        describe_counter!(
            "ingest_pass_failures_total",
            "Passes aborted by an unexpected fault."
        );
        describe_counter!("ingest_entries_total", "Feed entries processed.");
        describe_counter!(
            "ingest_duplicates_total",
            "Entries skipped because their URL is already stored."
        );
        describe_counter!("ingest_added_total", "Articles inserted into the store.");
        describe_counter!(
            "ingest_feed_errors_total",
            "Feeds that could not be fetched or parsed."
        );
        describe_counter!("ingest_insert_errors_total", "Failed store inserts.");
        describe_counter!(
            "ingest_query_errors_total",
            "Failed store existence checks (treated as new)."
        );
        describe_histogram!("ingest_fetch_ms", "Feed download + parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Fetch → normalize → deduplicate → persist, over a fixed list of feeds.
///
/// Feeds are handled one after another, entries in the order the feed lists them.
/// A failing feed or entry is logged and skipped; nothing here aborts a pass.
pub struct Pipeline {
    sources: Arc<[FeedSource]>,
    fetcher: Arc<dyn FeedFetcher>,
    store: StoreGateway,
}

impl Pipeline {
    pub fn new(
        sources: impl Into<Arc<[FeedSource]>>,
        fetcher: Arc<dyn FeedFetcher>,
        store: StoreGateway,
    ) -> Self {
        Self {
            sources: sources.into(),
            fetcher,
            store,
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Run a single pass over every configured feed.
    pub async fn run_once(&self) -> RunStats {
        ensure_metrics_described();

        let total = self.sources.len();
        let mut stats = RunStats {
            feeds_total: total,
            ..RunStats::default()
        };
        tracing::info!(target: "ingest", feeds = total, "pass started");

        for (i, source) in self.sources.iter().enumerate() {
            tracing::info!(target: "ingest", "[{}/{}] {}", i + 1, total, source.name);

            let entries = match self.fetcher.fetch(source).await {
                FetchOutcome::Entries(entries) => entries,
                FetchOutcome::Failed(e) => {
                    tracing::warn!(target: "ingest", feed = %source.name, error = %e, "feed skipped");
                    counter!("ingest_feed_errors_total").increment(1);
                    stats.feeds_failed += 1;
                    continue;
                }
            };
            tracing::info!(target: "ingest", feed = %source.name, found = entries.len(), "entries fetched");

            let feed_stats = self.ingest_feed(source, &entries).await;
            tracing::info!(
                target: "ingest",
                feed = %source.name,
                processed = feed_stats.processed,
                duplicates = feed_stats.duplicates,
                added = feed_stats.added,
                failed = feed_stats.failed,
                "feed done"
            );
            stats.absorb(&feed_stats);
        }

        counter!("ingest_runs_total").increment(1);
        gauge!("ingest_pipeline_last_run_ts").set(Local::now().timestamp().max(0) as f64);

        tracing::info!(
            target: "ingest",
            feeds = stats.feeds_total,
            feeds_failed = stats.feeds_failed,
            processed = stats.entries_processed,
            duplicates = stats.duplicates_skipped,
            added = stats.articles_added,
            "pass finished"
        );
        stats
    }

    async fn ingest_feed(&self, source: &FeedSource, entries: &[RawEntry]) -> FeedStats {
        let mut fs = FeedStats::default();
        for (j, entry) in entries.iter().enumerate() {
            let index = j + 1;
            fs.processed += 1;
            counter!("ingest_entries_total").increment(1);

            match self.ingest_entry(source, index, entry).await {
                EntryOutcome::Added => {
                    fs.added += 1;
                    counter!("ingest_added_total").increment(1);
                }
                EntryOutcome::Duplicate => {
                    fs.duplicates += 1;
                    counter!("ingest_duplicates_total").increment(1);
                }
                EntryOutcome::Failed(e) => {
                    fs.failed += 1;
                    if matches!(e, IngestError::Insert { .. }) {
                        counter!("ingest_insert_errors_total").increment(1);
                    }
                    tracing::warn!(
                        target: "ingest",
                        feed = %source.name,
                        index,
                        kind = e.kind(),
                        error = %e,
                        "entry skipped"
                    );
                }
            }
        }
        fs
    }

    async fn ingest_entry(
        &self,
        source: &FeedSource,
        index: usize,
        entry: &RawEntry,
    ) -> EntryOutcome {
        let collected = Local::now().date_naive();
        let Some(record) = normalize_entry(entry, &source.name, collected) else {
            return EntryOutcome::Failed(IngestError::MissingLink {
                feed: source.name.clone(),
                index,
            });
        };

        let present = match self.store.lookup(&record.url).await {
            Ok(present) => present,
            Err(e) => {
                counter!("ingest_query_errors_total").increment(1);
                tracing::warn!(
                    target: "ingest",
                    feed = %source.name,
                    index,
                    error = %e,
                    "existence check failed, treating as new"
                );
                false
            }
        };
        if present {
            return EntryOutcome::Duplicate;
        }

        match self.store.insert(&record).await {
            Ok(()) => {
                let title = truncate_chars(&record.title, LOG_TITLE_CHARS);
                tracing::info!(target: "ingest", index, %title, "added");
                EntryOutcome::Added
            }
            Err(e) => EntryOutcome::Failed(e),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemoryStore;
    use async_trait::async_trait;

    struct OneFeed(Vec<RawEntry>);

    #[async_trait]
    impl FeedFetcher for OneFeed {
        async fn fetch(&self, _source: &FeedSource) -> FetchOutcome {
            FetchOutcome::Entries(self.0.clone())
        }
    }

    fn entry(link: Option<&str>) -> RawEntry {
        RawEntry {
            title: Some("t".into()),
            link: link.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("éééé", 2), "éé...");
    }

    #[tokio::test]
    async fn entry_without_link_is_counted_and_skipped() {
        let store = Arc::new(MemoryStore::new());
        let p = Pipeline::new(
            vec![FeedSource::new("F", "mem://f")],
            Arc::new(OneFeed(vec![entry(None), entry(Some("https://x/1"))])),
            StoreGateway::new(store.clone()),
        );
        let stats = p.run_once().await;
        assert_eq!(stats.entries_processed, 2);
        assert_eq!(stats.articles_added, 1);
        assert_eq!(stats.entries_failed, 1);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn repeated_link_in_one_feed_is_stored_once() {
        let store = Arc::new(MemoryStore::new());
        let p = Pipeline::new(
            vec![FeedSource::new("F", "mem://f")],
            Arc::new(OneFeed(vec![entry(Some("https://x/1")), entry(Some("https://x/1"))])),
            StoreGateway::new(store.clone()),
        );
        let stats = p.run_once().await;
        assert_eq!(stats.articles_added, 1);
        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(store.records().len(), 1);
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn query_fault_is_logged_with_feed_and_index() {
        let buf = LogBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryStore::new().failing_queries());
        let p = Pipeline::new(
            vec![FeedSource::new("Veille", "mem://f")],
            Arc::new(OneFeed(vec![entry(Some("https://x/1"))])),
            StoreGateway::new(store.clone()),
        );
        let stats = p.run_once().await;
        assert_eq!(stats.articles_added, 1);

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let line = out
            .lines()
            .find(|l| l.contains("existence check failed"))
            .unwrap_or_else(|| panic!("no query fault line in:\n{out}"));
        assert!(line.contains(" ingest:"), "{line}");
        assert!(line.contains("feed=Veille"), "{line}");
        assert!(line.contains("index=1"), "{line}");
    }
}
