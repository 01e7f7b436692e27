// src/ingest/providers/rss.rs
//! RSS 2.0 / RSS 1.0 / Atom documents → [`RawEntry`] list, and the HTTP fetcher around it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use reqwest::Client;
use serde::Deserialize;

use crate::ingest::error::IngestError;
use crate::ingest::normalize::normalize_text;
use crate::ingest::types::{FeedFetcher, FeedSource, FetchOutcome, RawEntry};

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

// --- RSS 1.0 (RDF): items are siblings of the channel ---

#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

impl AtomText {
    /// `None` when nothing readable is left once markup is stripped.
    fn non_blank(self) -> Option<String> {
        (!normalize_text(&self.value).is_empty()).then_some(self.value)
    }
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl From<Item> for RawEntry {
    fn from(it: Item) -> Self {
        RawEntry {
            title: it.title,
            link: it.link,
            raw_summary: it.description,
            raw_published: it.pub_date,
        }
    }
}

impl From<AtomEntry> for RawEntry {
    fn from(e: AtomEntry) -> Self {
        // rel defaults to "alternate" when absent
        let link = e
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| e.links.first())
            .and_then(|l| l.href.clone());
        RawEntry {
            title: e.title.and_then(AtomText::non_blank),
            link,
            raw_summary: e
                .summary
                .and_then(AtomText::non_blank)
                .or_else(|| e.content.and_then(AtomText::non_blank)),
            raw_published: e.published.or(e.updated),
        }
    }
}

/// Parse a feed document. Fails on anything that is not RSS or Atom.
pub fn parse_feed(xml: &str) -> Result<Vec<RawEntry>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let root = root_element(&xml_clean).ok_or_else(|| anyhow!("no root element in feed"))?;

    let entries: Vec<RawEntry> = match root.as_str() {
        "rss" => {
            let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
            rss.channel.item.into_iter().map(RawEntry::from).collect()
        }
        "RDF" => {
            let rdf: Rdf = from_str(&xml_clean).context("parsing rdf xml")?;
            rdf.item.into_iter().map(RawEntry::from).collect()
        }
        "feed" => {
            let xml_atom = wrap_atom_xhtml(&xml_clean)?;
            let atom: AtomFeed = from_str(&xml_atom).context("parsing atom xml")?;
            atom.entry.into_iter().map(RawEntry::from).collect()
        }
        other => bail!("unsupported feed root element <{other}>"),
    };
    Ok(entries)
}

/// Local name of the first element, e.g. `rss`, `feed`, `RDF`.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// XML knows five named entities; feeds routinely carry HTML ones (`&nbsp;`, `&rsquo;`)
/// and bare ampersands in links (`?a=1&b=2`). Rewrite both so the XML parser accepts them.
/// CDATA sections are copied as-is.
fn scrub_html_entities_for_xml(s: &str) -> String {
    static RE_AMP: OnceCell<Regex> = OnceCell::new();
    let re = RE_AMP.get_or_init(|| {
        Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>|&(?:#[0-9]+;|#[xX][0-9A-Fa-f]+;|([A-Za-z][A-Za-z0-9]*);)?")
            .expect("static regex")
    });
    re.replace_all(s, |caps: &Captures| {
        let whole = &caps[0];
        if !whole.starts_with('&') || whole.starts_with("&#") {
            return whole.to_string();
        }
        let Some(name) = caps.get(1) else {
            // bare ampersand
            return "&amp;".to_string();
        };
        if matches!(name.as_str(), "amp" | "lt" | "gt" | "quot" | "apos") {
            return whole.to_string();
        }
        let decoded = html_escape::decode_html_entities(whole);
        if decoded == whole {
            // unknown entity: escape the ampersand so it survives as text
            return format!("&amp;{}", &whole[1..]);
        }
        decoded.chars().map(|c| format!("&#{};", c as u32)).collect()
    })
    .into_owned()
}

/// Atom `type="xhtml"` text holds a `<div>` of markup. Wrap that markup in CDATA so it
/// reaches the record as text, the same way an HTML `<description>` does.
fn wrap_atom_xhtml(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut spans = Vec::new();
    loop {
        match reader.read_event().context("scanning atom xml")? {
            Event::Start(e)
                if matches!(e.local_name().as_ref(), b"title" | b"summary" | b"content")
                    && e
                        .try_get_attribute("type")
                        .ok()
                        .flatten()
                        .is_some_and(|a| a.value.as_ref() == b"xhtml") =>
            {
                let end = e.to_end().into_owned();
                let span = reader.read_to_end(end.name()).context("reading xhtml text")?;
                spans.push(span.start as usize..span.end as usize);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut out = String::with_capacity(xml.len() + spans.len() * 12);
    let mut last = 0;
    for span in spans {
        out.push_str(&xml[last..span.start]);
        out.push_str("<![CDATA[");
        out.push_str(&xml[span.clone()].replace("]]>", "]]]]><![CDATA[>"));
        out.push_str("]]>");
        last = span.end;
    }
    out.push_str(&xml[last..]);
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: concat!("feed-watch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Downloads feeds over HTTP(S).
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent)
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("feed http get()")?
            .error_for_status()
            .context("feed http status")?;
        resp.text().await.context("feed http .text()")
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> FetchOutcome {
        let t0 = Instant::now();
        let result = match self.download(&source.endpoint).await {
            Ok(body) => parse_feed(&body),
            Err(e) => Err(e),
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(entries) => FetchOutcome::Entries(entries),
            Err(e) => FetchOutcome::Failed(IngestError::fetch(&source.name, e)),
        }
    }
}

/// Serves feed documents from memory, keyed by endpoint.
#[derive(Default)]
pub struct FixtureFeedFetcher {
    docs: HashMap<String, String>,
}

impl FixtureFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, endpoint: impl Into<String>, xml: impl Into<String>) -> Self {
        self.docs.insert(endpoint.into(), xml.into());
        self
    }
}

#[async_trait]
impl FeedFetcher for FixtureFeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> FetchOutcome {
        let parsed = self
            .docs
            .get(&source.endpoint)
            .ok_or_else(|| anyhow!("no fixture for {}", source.endpoint))
            .and_then(|xml| parse_feed(xml));
        match parsed {
            Ok(entries) => FetchOutcome::Entries(entries),
            Err(e) => FetchOutcome::Failed(IngestError::fetch(&source.name, e)),
        }
    }
}
