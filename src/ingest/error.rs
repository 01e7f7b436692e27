// src/ingest/error.rs
use thiserror::Error;

/// Faults contained inside a pass. None of them stops the pass.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Feed could not be downloaded or parsed; the feed is skipped.
    #[error("feed '{feed}' could not be fetched: {source:#}")]
    Fetch {
        feed: String,
        #[source]
        source: anyhow::Error,
    },

    /// Existence check failed; the entry is treated as new.
    #[error("existence check for {url} failed: {source:#}")]
    Query {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Store refused or failed the create; the entry is skipped until a later pass.
    #[error("insert of {url} failed: {source:#}")]
    Insert {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("entry [{index}] of feed '{feed}' has no link")]
    MissingLink { feed: String, index: usize },
}

impl IngestError {
    pub fn fetch(feed: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Fetch {
            feed: feed.into(),
            source: source.into(),
        }
    }

    pub fn insert(url: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Insert {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch { .. } => "fetch",
            IngestError::Query { .. } => "query",
            IngestError::Insert { .. } => "insert",
            IngestError::MissingLink { .. } => "missing_link",
        }
    }
}
