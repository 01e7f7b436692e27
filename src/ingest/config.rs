// src/ingest/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::ingest::scheduler::Trigger;
use crate::ingest::store::{AirtableSettings, DEFAULT_API_BASE};
use crate::ingest::types::FeedSource;

pub const ENV_CONFIG_PATH: &str = "FEEDWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/feeds.toml";

pub const ENV_API_KEY: &str = "AIRTABLE_API_KEY";
pub const ENV_BASE_ID: &str = "AIRTABLE_BASE_ID";
pub const ENV_TABLE_NAME: &str = "AIRTABLE_TABLE_NAME";

const DEFAULT_TOPIC: &str = "intelligence artificielle";
const DEFAULT_DAILY_AT: &str = "09:00";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 15;

fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new(
            "Google News IA",
            "https://news.google.com/rss/search?q=intelligence+artificielle&hl=fr&gl=FR&ceid=FR:fr",
        ),
        FeedSource::new("ActuIA", "https://www.actuia.com/feed"),
        FeedSource::new(
            "Euronews IA",
            "https://fr.euronews.com/rss?level=tag&name=intelligence-artificielle",
        ),
    ]
}

/// Process configuration. Built once at start-up and only read afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub topic: String,
    pub feeds: Vec<FeedSource>,
    pub trigger: Trigger,
    pub store: StoreConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub base_id: Option<String>,
    pub table: Option<String>,
    pub timeout: Duration,
}

impl StoreConfig {
    /// Settings for the REST store; fails when the credential or table location is missing.
    pub fn airtable_settings(&self) -> Result<AirtableSettings> {
        let require = |v: &Option<String>, env: &str| {
            v.clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| anyhow!("missing {env}"))
        };
        Ok(AirtableSettings {
            api_base: self.api_base.clone(),
            api_key: require(&self.api_key, ENV_API_KEY)?,
            base_id: require(&self.base_id, ENV_BASE_ID)?,
            table: require(&self.table, ENV_TABLE_NAME)?,
            timeout: self.timeout,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    topic: Option<String>,
    schedule: Option<ScheduleSection>,
    store: Option<StoreSection>,
    feeds: Option<Vec<FeedSource>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduleSection {
    daily_at: Option<String>,
    every_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    api_base: Option<String>,
    base_id: Option<String>,
    table: Option<String>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Built-in feed list and schedule, no store credentials.
    pub fn defaults() -> Result<Self> {
        Self::from_file_config(FileConfig::default())
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let fc: FileConfig = toml::from_str(s).context("parsing feed config toml")?;
        Self::from_file_config(fc)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Resolve the config file:
    /// 1) `explicit` (command line)
    /// 2) $FEEDWATCH_CONFIG
    /// 3) config/feeds.toml
    /// 4) built-in defaults
    ///
    /// then overlay the store variables from the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match resolve_path(explicit, std::env::var(ENV_CONFIG_PATH).ok())? {
            Some(p) => Self::load_from(&p)?,
            None => Self::defaults()?,
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Environment wins over the file for the store location and credential.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get(ENV_API_KEY) {
            self.store.api_key = Some(v);
        }
        if let Some(v) = get(ENV_BASE_ID) {
            self.store.base_id = Some(v);
        }
        if let Some(v) = get(ENV_TABLE_NAME) {
            self.store.table = Some(v);
        }
    }

    /// Log the configuration; the credential is only reported as present or missing.
    pub fn log_summary(&self) {
        let presence = |v: &Option<String>| if v.is_some() { "OK" } else { "MISSING" };
        tracing::info!(
            topic = %self.topic,
            feeds = self.feeds.len(),
            trigger = %self.trigger,
            api_key = presence(&self.store.api_key),
            base_id = presence(&self.store.base_id),
            table = self.store.table.as_deref().unwrap_or("MISSING"),
            "configuration loaded"
        );
    }

    fn from_file_config(fc: FileConfig) -> Result<Self> {
        let feeds = match fc.feeds {
            Some(feeds) => clean_feeds(feeds)?,
            None => default_feeds(),
        };

        let sched = fc.schedule.unwrap_or_default();
        let trigger = match (sched.daily_at.as_deref(), sched.every_secs) {
            (Some(_), Some(_)) => bail!("schedule: set either daily_at or every_secs, not both"),
            (Some(hhmm), None) => Trigger::daily_at(hhmm)?,
            (None, Some(secs)) => Trigger::every_secs(secs)?,
            (None, None) => Trigger::daily_at(DEFAULT_DAILY_AT)?,
        };

        let store = fc.store.unwrap_or_default();
        Ok(Config {
            topic: fc.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            feeds,
            trigger,
            store: StoreConfig {
                api_base: store.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                api_key: None,
                base_id: store.base_id,
                table: store.table,
                timeout: Duration::from_secs(
                    store.timeout_secs.unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
                ),
            },
        })
    }
}

fn resolve_path(explicit: Option<&Path>, env_path: Option<String>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit {
        return Ok(Some(p.to_path_buf()));
    }
    if let Some(p) = env_path {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    Ok(default.exists().then_some(default))
}

fn clean_feeds(feeds: Vec<FeedSource>) -> Result<Vec<FeedSource>> {
    let mut out = Vec::with_capacity(feeds.len());
    for f in feeds {
        let name = f.name.trim();
        let url = f.endpoint.trim();
        if name.is_empty() {
            bail!("feed with url '{url}' has an empty name");
        }
        if url.is_empty() {
            bail!("feed '{name}' has an empty url");
        }
        out.push(FeedSource::new(name, url));
    }
    if out.is_empty() {
        bail!("no feeds configured");
    }
    Ok(out)
}
