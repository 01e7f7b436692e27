// src/ingest/types.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ingest::error::IngestError;

/// One configured feed. Built once at start-up, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    #[serde(rename = "url")]
    pub endpoint: String,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Entry as delivered by a feed, before any cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>, // unique key once trimmed
    pub raw_summary: Option<String>,
    pub raw_published: Option<String>,
}

/// Normalized article, serialized with the store's column names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRecord {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Summary")]
    pub summary: String,
    #[serde(rename = "Source")]
    pub source_name: String,
    /// `YYYY-MM-DD` when the feed date parsed, otherwise the feed's own string.
    #[serde(rename = "Published")]
    pub published_date: String,
    #[serde(rename = "Collected")]
    pub collected_date: NaiveDate,
}

/// Counters for a single feed within one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub processed: usize,
    pub duplicates: usize,
    pub added: usize,
    pub failed: usize,
}

/// Counters for one pass. Discarded after the pass has been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub entries_processed: usize,
    pub duplicates_skipped: usize,
    pub articles_added: usize,
    pub entries_failed: usize,
}

impl RunStats {
    pub fn absorb(&mut self, feed: &FeedStats) {
        self.entries_processed += feed.processed;
        self.duplicates_skipped += feed.duplicates;
        self.articles_added += feed.added;
        self.entries_failed += feed.failed;
    }
}

/// Result of fetching a single feed.
///
/// `Entries(vec![])` and `Failed(_)` lead to the same control flow (next feed);
/// they are kept apart only so the two cases can be logged and counted differently.
#[derive(Debug)]
pub enum FetchOutcome {
    Entries(Vec<RawEntry>),
    Failed(IngestError),
}

/// Result of handling a single entry.
#[derive(Debug)]
pub enum EntryOutcome {
    Added,
    Duplicate,
    Failed(IngestError),
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Must not panic on malformed or unreachable feeds: faults come back as `Failed`.
    async fn fetch(&self, source: &FeedSource) -> FetchOutcome;
}
