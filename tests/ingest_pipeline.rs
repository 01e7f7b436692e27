// tests/ingest_pipeline.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Local;
use feed_watch::ingest::error::IngestError;
use feed_watch::ingest::providers::rss::FixtureFeedFetcher;
use feed_watch::ingest::store::{MemoryStore, StoreGateway};
use feed_watch::ingest::types::{
    ArticleRecord, FeedFetcher, FeedSource, FetchOutcome, RawEntry, RunStats,
};
use feed_watch::Pipeline;

/// Serves canned entries per endpoint; endpoints without entries fail.
#[derive(Default)]
struct ScriptedFetcher {
    feeds: HashMap<String, Vec<RawEntry>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn with(mut self, endpoint: &str, entries: Vec<RawEntry>) -> Self {
        self.feeds.insert(endpoint.to_string(), entries);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &FeedSource) -> FetchOutcome {
        self.calls.lock().unwrap().push(source.name.clone());
        match self.feeds.get(&source.endpoint) {
            Some(v) => FetchOutcome::Entries(v.clone()),
            None => FetchOutcome::Failed(IngestError::fetch(
                &source.name,
                anyhow!("connection reset"),
            )),
        }
    }
}

fn entry(link: &str) -> RawEntry {
    RawEntry {
        title: Some(format!("Title for {link}")),
        link: Some(link.to_string()),
        raw_summary: Some("summary".into()),
        raw_published: Some("Tue, 02 Jan 2024 10:00:00 +0100".into()),
    }
}

fn stored(url: &str) -> ArticleRecord {
    ArticleRecord {
        url: url.into(),
        title: "old".into(),
        summary: "".into(),
        source_name: "A".into(),
        published_date: "2023-12-31".into(),
        collected_date: Local::now().date_naive(),
    }
}

fn pipeline(
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<MemoryStore>,
) -> Pipeline {
    Pipeline::new(sources, fetcher, StoreGateway::new(store))
}

#[tokio::test]
async fn end_to_end_single_entry() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "https://feed/a",
        vec![RawEntry {
            title: Some("<b>AI News</b>".into()),
            link: Some("https://x/1".into()),
            raw_summary: Some("s1".into()),
            raw_published: Some("Mon, 02 Jan 2024 10:00:00 +0100".into()),
        }],
    ));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        vec![FeedSource::new("AI Feed", "https://feed/a")],
        fetcher,
        store.clone(),
    );

    let stats = p.run_once().await;

    assert_eq!(
        stats,
        RunStats {
            feeds_total: 1,
            entries_processed: 1,
            duplicates_skipped: 0,
            articles_added: 1,
            ..RunStats::default()
        }
    );
    assert_eq!(store.insert_calls(), 1);
    assert_eq!(
        store.records(),
        vec![ArticleRecord {
            url: "https://x/1".into(),
            title: "AI News".into(),
            summary: "s1".into(),
            source_name: "AI Feed".into(),
            published_date: "2024-01-02".into(),
            collected_date: Local::now().date_naive(),
        }]
    );
}

#[tokio::test]
async fn second_pass_over_unchanged_feeds_adds_nothing() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .with("https://feed/a", vec![entry("https://x/1"), entry("https://x/2")])
            .with("https://feed/b", vec![entry("https://x/3")]),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        vec![
            FeedSource::new("A", "https://feed/a"),
            FeedSource::new("B", "https://feed/b"),
        ],
        fetcher,
        store.clone(),
    );

    let first = p.run_once().await;
    assert_eq!(first.articles_added, 3);

    let second = p.run_once().await;
    assert_eq!(second.articles_added, 0);
    assert_eq!(second.duplicates_skipped, 3);
    assert_eq!(second.entries_processed, 3);
    assert_eq!(store.records().len(), 3);
    assert_eq!(store.insert_calls(), 3);
}

#[tokio::test]
async fn failing_feed_does_not_stop_the_others() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .with("https://feed/a", vec![entry("https://x/a1")])
            // feed/b is not scripted → fetch fails
            .with("https://feed/c", vec![entry("https://x/c1"), entry("https://x/c2")]),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        vec![
            FeedSource::new("A", "https://feed/a"),
            FeedSource::new("B", "https://feed/b"),
            FeedSource::new("C", "https://feed/c"),
        ],
        fetcher.clone(),
        store.clone(),
    );

    let stats = p.run_once().await;

    assert_eq!(fetcher.calls(), vec!["A", "B", "C"]);
    assert_eq!(stats.feeds_total, 3);
    assert_eq!(stats.feeds_failed, 1);
    assert_eq!(stats.entries_processed, 3);
    assert_eq!(stats.articles_added, 3);
    let urls: Vec<_> = store.records().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["https://x/a1", "https://x/c1", "https://x/c2"]);
}

#[tokio::test]
async fn known_url_is_skipped_and_new_one_inserted() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "https://feed/a",
        vec![entry("https://x/old"), entry("https://x/new")],
    ));
    let store = Arc::new(MemoryStore::with_records(vec![stored("https://x/old")]));
    let p = pipeline(
        vec![FeedSource::new("A", "https://feed/a")],
        fetcher,
        store.clone(),
    );

    let stats = p.run_once().await;

    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(stats.articles_added, 1);
    assert_eq!(store.insert_calls(), 1);
    // the existing record is left untouched
    assert_eq!(store.records()[0].title, "old");
}

#[tokio::test]
async fn failed_insert_does_not_stop_the_feed() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "https://feed/a",
        vec![entry("https://x/1"), entry("https://x/2"), entry("https://x/3")],
    ));
    let store = Arc::new(MemoryStore::new().failing_insert_for("https://x/2"));
    let p = pipeline(
        vec![FeedSource::new("A", "https://feed/a")],
        fetcher,
        store.clone(),
    );

    let stats = p.run_once().await;

    assert_eq!(store.insert_calls(), 3);
    assert_eq!(stats.entries_processed, 3);
    assert_eq!(stats.articles_added, 2);
    assert_eq!(stats.entries_failed, 1);
    let urls: Vec<_> = store.records().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["https://x/1", "https://x/3"]);
}

#[tokio::test]
async fn failed_existence_check_inserts_anyway() {
    let fetcher = Arc::new(
        ScriptedFetcher::default().with("https://feed/a", vec![entry("https://x/1")]),
    );
    let store = Arc::new(MemoryStore::with_records(vec![stored("https://x/1")]).failing_queries());
    let p = pipeline(
        vec![FeedSource::new("A", "https://feed/a")],
        fetcher,
        store.clone(),
    );

    let stats = p.run_once().await;

    assert_eq!(stats.duplicates_skipped, 0);
    assert_eq!(stats.articles_added, 1);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn empty_feed_is_not_a_failure() {
    let fetcher = Arc::new(ScriptedFetcher::default().with("https://feed/a", vec![]));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        vec![FeedSource::new("A", "https://feed/a")],
        fetcher,
        store,
    );

    let stats = p.run_once().await;
    assert_eq!(stats.feeds_failed, 0);
    assert_eq!(stats.entries_processed, 0);
}

#[tokio::test]
async fn fixture_feeds_flow_into_the_store() {
    let fetcher = Arc::new(
        FixtureFeedFetcher::new()
            .with_feed("mem://actuia", include_str!("fixtures/actuia_rss.xml"))
            .with_feed("mem://euronews", include_str!("fixtures/euronews_atom.xml")),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        vec![
            FeedSource::new("ActuIA", "mem://actuia"),
            FeedSource::new("Euronews IA", "mem://euronews"),
        ],
        fetcher,
        store.clone(),
    );

    let stats = p.run_once().await;
    assert_eq!(stats.articles_added, 5);

    let records = store.records();
    assert_eq!(records[0].published_date, "2024-01-02");
    assert_eq!(records[0].source_name, "ActuIA");
    assert_eq!(records[1].title, "IA & santé : trois annonces");
    // unparsable dates are kept verbatim
    assert_eq!(records[2].published_date, "jeudi 4 janvier 2024");
    assert_eq!(records[3].published_date, "2024-01-05T11:00:00Z");
    assert_eq!(records[3].source_name, "Euronews IA");
}
