// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cli;
pub mod ingest;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Result;

use crate::ingest::config::Config;
use crate::ingest::providers::rss::{FetchSettings, HttpFeedFetcher};
use crate::ingest::store::{AirtableStore, MemoryStore, RecordStore, StoreGateway};

// ---- Re-exports for stable public API ----
pub use crate::ingest::scheduler::{run_forever, run_pass, PassOutcome, Trigger};
pub use crate::ingest::types::{ArticleRecord, FeedSource, RunStats};
pub use crate::ingest::Pipeline;

/// Wire the pipeline from configuration: HTTP feeds plus the REST store,
/// or an in-memory store when `dry_run` is set.
pub fn build_pipeline(cfg: &Config, dry_run: bool) -> Result<Pipeline> {
    let fetcher = Arc::new(HttpFeedFetcher::new(FetchSettings::default())?);
    let store: Arc<dyn RecordStore> = if dry_run {
        tracing::warn!("dry run: records are kept in memory and discarded on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(AirtableStore::new(cfg.store.airtable_settings()?)?)
    };
    Ok(Pipeline::new(
        cfg.feeds.clone(),
        fetcher,
        StoreGateway::new(store),
    ))
}
