// src/ingest/store.rs
//! Record store seam: the external table plus the gateway the pipeline talks to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ingest::error::IngestError;
use crate::ingest::types::ArticleRecord;

/// Black-box persistence: exact-match query on URL and record creation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Ids of records whose URL field equals `url`.
    async fn find_by_url(&self, url: &str) -> Result<Vec<String>>;
    /// Create a record, returning its id.
    async fn create(&self, record: &ArticleRecord) -> Result<String>;
}

/// What the pipeline uses: fault policy on top of a [`RecordStore`].
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn RecordStore>,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Whether a record with exactly this URL is stored; a store fault is returned as-is.
    pub async fn lookup(&self, url: &str) -> Result<bool, IngestError> {
        match self.store.find_by_url(url).await {
            Ok(ids) => Ok(!ids.is_empty()),
            Err(source) => Err(IngestError::Query {
                url: url.to_string(),
                source,
            }),
        }
    }

    /// A failed query counts as "not present": a possible duplicate beats a lost article.
    pub async fn exists(&self, url: &str) -> bool {
        match self.lookup(url).await {
            Ok(present) => present,
            Err(err) => {
                counter!("ingest_query_errors_total").increment(1);
                tracing::warn!(target: "ingest", error = %err, "existence check failed, treating as new");
                false
            }
        }
    }

    pub async fn insert(&self, record: &ArticleRecord) -> Result<(), IngestError> {
        match self.store.create(record).await {
            Ok(id) => {
                tracing::debug!(target: "ingest", %id, url = %record.url, "record created");
                Ok(())
            }
            Err(e) => Err(IngestError::insert(&record.url, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Airtable-compatible REST table
// ---------------------------------------------------------------------------

pub const DEFAULT_API_BASE: &str = "https://api.airtable.com";

#[derive(Debug, Clone)]
pub struct AirtableSettings {
    pub api_base: String,
    pub api_key: String,
    pub base_id: String,
    pub table: String,
    pub timeout: Duration,
}

pub struct AirtableStore {
    settings: AirtableSettings,
    client: Client,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RecordRef>,
}

#[derive(Deserialize)]
struct RecordRef {
    id: String,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    fields: &'a ArticleRecord,
    typecast: bool,
}

impl AirtableStore {
    pub fn new(settings: AirtableSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("building store http client")?;
        Ok(Self { settings, client })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/v0/{}/{}",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.base_id,
            self.settings.table
        )
    }
}

/// `{URL}='<url>'` with the literal escaped for the formula language.
pub fn url_formula(url: &str) -> String {
    let escaped = url.replace('\\', "\\\\").replace('\'', "\\'");
    format!("{{URL}}='{escaped}'")
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn find_by_url(&self, url: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.table_url())
            .bearer_auth(&self.settings.api_key)
            .query(&[
                ("filterByFormula", url_formula(url).as_str()),
                ("maxRecords", "1"),
            ])
            .send()
            .await
            .context("store query request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("store query returned {status}: {body}");
        }
        let list: ListResponse = resp.json().await.context("decoding store query response")?;
        Ok(list.records.into_iter().map(|r| r.id).collect())
    }

    async fn create(&self, record: &ArticleRecord) -> Result<String> {
        let resp = self
            .client
            .post(self.table_url())
            .bearer_auth(&self.settings.api_key)
            .json(&CreateRequest {
                fields: record,
                typecast: false,
            })
            .send()
            .await
            .context("store create request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("store create returned {status}: {body}");
        }
        let created: RecordRef = resp.json().await.context("decoding store create response")?;
        Ok(created.id)
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests, --dry-run)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ArticleRecord>>,
    insert_calls: AtomicUsize,
    failing_inserts: HashSet<String>,
    failing_queries: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ArticleRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Every `create` for this URL fails.
    pub fn failing_insert_for(mut self, url: impl Into<String>) -> Self {
        self.failing_inserts.insert(url.into());
        self
    }

    /// Every `find_by_url` fails.
    pub fn failing_queries(mut self) -> Self {
        self.failing_queries = true;
        self
    }

    pub fn records(&self) -> Vec<ArticleRecord> {
        self.records.lock().expect("store mutex poisoned").clone()
    }

    /// Number of `create` calls, failed ones included.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_url(&self, url: &str) -> Result<Vec<String>> {
        if self.failing_queries {
            return Err(anyhow!("memory store: query failure injected"));
        }
        let records = self.records.lock().expect("store mutex poisoned");
        Ok(records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.url == url)
            .map(|(i, _)| format!("mem{i}"))
            .collect())
    }

    async fn create(&self, record: &ArticleRecord) -> Result<String> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_inserts.contains(&record.url) {
            return Err(anyhow!("memory store: insert failure injected"));
        }
        let mut records = self.records.lock().expect("store mutex poisoned");
        records.push(record.clone());
        Ok(format!("mem{}", records.len() - 1))
    }
}
