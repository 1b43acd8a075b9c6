// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::ingest::providers::rss::{feed_http_client, RssFeed};
use crate::ingest::types::{FeedEndpoint, FeedEntry, FeedKind, FeedSource};
use crate::store::queue::mint_id;
use crate::store::{QueueItem, WorkQueue};

/// Excerpts longer than this are cut before queueing.
pub const EXCERPT_CAP_CHARS: usize = 2000;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_entries_total", "Entries parsed from feeds.");
        describe_counter!("ingest_appended_total", "Entries appended to the work queue.");
        describe_counter!(
            "ingest_incomplete_total",
            "Entries dropped for a missing title or link."
        );
        describe_counter!(
            "ingest_duplicate_total",
            "Entries dropped because their link is already queued."
        );
        describe_counter!("ingest_feed_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("ingest_queue_len", "Work queue length after the last fetch.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the fetcher last ran.");
    });
}

/// Normalize excerpt text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Punctuation left dangling by tag removal
    out = out.replace(" .", ".").replace(" ,", ",");

    // 6) Length cap
    if out.chars().count() > EXCERPT_CAP_CHARS {
        out = out.chars().take(EXCERPT_CAP_CHARS).collect();
    }

    out
}

/// Counts from one fetch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub appended: usize,
    pub incomplete: usize,
    pub duplicates: usize,
    pub failed_feeds: usize,
    pub queue_len: usize,
}

/// Turn a feed entry into a queue item; `None` when title or link is missing.
pub fn to_queue_item(
    entry: FeedEntry,
    endpoint: &FeedEndpoint,
    channel_title: Option<&str>,
    now: DateTime<Utc>,
) -> Option<QueueItem> {
    let title = entry.title.filter(|t| !t.trim().is_empty())?;
    let link = entry.link.filter(|l| !l.trim().is_empty())?;
    let source = endpoint
        .label
        .clone()
        .or_else(|| channel_title.map(str::to_string))
        .unwrap_or_else(|| endpoint.url.clone());
    Some(QueueItem {
        id: mint_id(now),
        source,
        title,
        link,
        published_at: Some(entry.published_at.unwrap_or(now)),
        raw_text: entry.excerpt,
        fetched_at: now,
        kind: endpoint.kind,
    })
}

/// Poll every source once and append unseen links to the queue.
///
/// A failing feed is logged and skipped. The queue is rewritten once at the end.
pub async fn run_once(sources: &[Box<dyn FeedSource>], queue: &WorkQueue) -> Result<FetchReport> {
    ensure_metrics_described();

    let existing = queue.load()?;
    let mut seen: HashSet<String> = existing.iter().map(|q| q.link.clone()).collect();
    let mut report = FetchReport::default();
    let mut fresh = Vec::new();

    for src in sources {
        let ep = src.endpoint();
        let doc = match src.fetch_document().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = ?e, feed = %ep.url, "feed error");
                counter!("ingest_feed_errors_total").increment(1);
                report.failed_feeds += 1;
                continue;
            }
        };

        let total = doc.entries.len();
        let mut kept = 0usize;
        let now = Utc::now();
        for entry in doc.entries {
            let Some(item) = to_queue_item(entry, ep, doc.channel_title.as_deref(), now) else {
                report.incomplete += 1;
                continue;
            };
            if !seen.insert(item.link.clone()) {
                report.duplicates += 1;
                continue;
            }
            fresh.push(item);
            kept += 1;
        }
        tracing::info!(
            target: "ingest",
            feed = %ep.url,
            kind = ep.kind.as_str(),
            entries = total,
            appended = kept,
            "feed processed"
        );
    }

    report.appended = queue.append_all(fresh)?;
    report.queue_len = existing.len() + report.appended;

    counter!("ingest_appended_total").increment(report.appended as u64);
    counter!("ingest_incomplete_total").increment(report.incomplete as u64);
    counter!("ingest_duplicate_total").increment(report.duplicates as u64);
    gauge!("ingest_queue_len").set(report.queue_len as f64);
    gauge!("ingest_last_run_ts").set(Utc::now().timestamp() as f64);

    tracing::info!(
        target: "ingest",
        appended = report.appended,
        duplicates = report.duplicates,
        incomplete = report.incomplete,
        failed_feeds = report.failed_feeds,
        queue_len = report.queue_len,
        "fetch pass finished"
    );
    Ok(report)
}

/// HTTP sources for the configured endpoints.
pub fn http_sources(feeds: &[FeedEndpoint], timeout: Duration) -> Result<Vec<Box<dyn FeedSource>>> {
    let client = feed_http_client(timeout)?;
    Ok(feeds
        .iter()
        .map(|ep| Box::new(RssFeed::from_endpoint(ep.clone(), client.clone())) as Box<dyn FeedSource>)
        .collect())
}

/// Built-in endpoint list.
pub fn default_feeds() -> Vec<FeedEndpoint> {
    const RELAY_LABEL: &str = "Telegram: @master_pera";
    let relay = |u: &str| FeedEndpoint::relay(u, RELAY_LABEL);
    vec![
        relay("https://rss.app/feeds/IQ0PQy3CTHnEtxPz.xml"),
        relay("https://rss.app/feeds/58xUYjfTTTVjx8p3.xml"),
        FeedEndpoint::rss("https://lenta.ru/rss"),
        FeedEndpoint::rss("https://tass.ru/rss/v2.xml"),
        FeedEndpoint::rss("https://www.interfax.ru/rss.asp"),
        FeedEndpoint::rss("https://www.vedomosti.ru/rss/news"),
        FeedEndpoint::rss("https://ria.ru/export/rss2/index.xml"),
        relay("https://rss.app/feeds/FuXm0qv4dbAHoE0T.xml"),
        FeedEndpoint::rss("https://www.forbes.com/business/feed/"),
        FeedEndpoint::rss("https://www.forbes.com/innovation/feed/"),
        relay("https://rss.app/feeds/A1n5pIkCH0a5IEur.xml"),
    ]
}

impl FeedKind {
    /// Guess the kind from a URL (relay services re-publish social channels).
    pub fn infer(url: &str) -> Self {
        if url.contains("rss.app") {
            FeedKind::Relay
        } else {
            FeedKind::Rss
        }
    }
}
