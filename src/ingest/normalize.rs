// src/ingest/normalize.rs
//! Pure cleanup of feed fields: markup stripping and feed date parsing.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::types::{ArticleRecord, RawEntry};

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }

    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags; an unclosed `<b` stays as text
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace (NBSP included, `\s` is Unicode-aware)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Turn `"Mon, 02 Jan 2024 10:00:00 +0100"` into `"2024-01-02"`.
///
/// The calendar date is taken in the feed's own offset. Anything that does not match
/// is returned unchanged; a date is never made up.
pub fn normalize_date(raw: &str) -> String {
    parse_feed_date(raw)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn parse_feed_date(raw: &str) -> Option<NaiveDate> {
    let (weekday, rest) = raw.trim().split_once(',')?;
    if !is_weekday_name(weekday.trim()) {
        return None;
    }
    // Weekday is not cross-checked against the date; feeds get it wrong often enough.
    DateTime::parse_from_str(rest.trim(), "%d %b %Y %H:%M:%S %z")
        .ok()
        .map(|dt| dt.date_naive())
}

fn is_weekday_name(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    WEEKDAYS
        .iter()
        .any(|full| *full == s || (s.len() == 3 && full.starts_with(s.as_str())))
}

/// Build the stored record for one entry. Returns `None` when the entry has no link.
pub fn normalize_entry(
    entry: &RawEntry,
    source_name: &str,
    collected: NaiveDate,
) -> Option<ArticleRecord> {
    let url = entry.link.as_deref().map(str::trim).filter(|l| !l.is_empty())?;
    Some(ArticleRecord {
        url: url.to_string(),
        title: normalize_text(entry.title.as_deref().unwrap_or_default()),
        summary: normalize_text(entry.raw_summary.as_deref().unwrap_or_default()),
        source_name: source_name.to_string(),
        published_date: normalize_date(entry.raw_published.as_deref().unwrap_or_default()),
        collected_date: collected,
    })
}
