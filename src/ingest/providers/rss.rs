use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime,
};

use crate::ingest::normalize_text;
use crate::ingest::types::{FeedDocument, FeedEndpoint, FeedEntry, FeedSource};

// RSS 2.0
#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
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

// Atom 1.0
#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<AtomText>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom) timestamps.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let parsed = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    DateTime::<Utc>::from_timestamp(parsed.unix_timestamp(), parsed.nanosecond())
}

fn clean_title(s: &str) -> Option<String> {
    let t = html_escape::decode_html_entities(s);
    let t = t.split_whitespace().collect::<Vec<_>>().join(" ");
    (!t.is_empty()).then_some(t)
}

fn clean_link(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_feed_document(xml: &str) -> Result<FeedDocument> {
    let xml_clean = scrub_html_entities_for_xml(xml);

    if let Ok(rss) = from_str::<Rss>(&xml_clean) {
        let entries = rss
            .channel
            .item
            .into_iter()
            .map(|it| FeedEntry {
                title: it.title.as_deref().and_then(clean_title),
                link: it.link.as_deref().and_then(clean_link),
                published_at: it.pub_date.as_deref().and_then(parse_feed_date),
                excerpt: normalize_text(it.description.as_deref().unwrap_or_default()),
            })
            .collect();
        return Ok(FeedDocument {
            channel_title: rss.channel.title.as_deref().and_then(clean_title),
            entries,
        });
    }

    if !xml_clean.contains("<feed") {
        return Err(anyhow!("document is neither rss nor atom"));
    }
    let atom: AtomFeed = from_str(&xml_clean).context("parsing atom feed xml")?;
    let entries = atom
        .entry
        .into_iter()
        .map(|e| {
            let link = e
                .link
                .iter()
                .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
                .or_else(|| e.link.first())
                .and_then(|l| l.href.as_deref())
                .and_then(clean_link);
            let body = e
                .summary
                .as_ref()
                .or(e.content.as_ref())
                .map(|t| t.value.as_str())
                .unwrap_or_default();
            FeedEntry {
                title: e.title.as_ref().and_then(|t| clean_title(&t.value)),
                link,
                published_at: e
                    .published
                    .as_deref()
                    .or(e.updated.as_deref())
                    .and_then(parse_feed_date),
                excerpt: normalize_text(body),
            }
        })
        .collect();
    Ok(FeedDocument {
        channel_title: atom.title.as_ref().and_then(|t| clean_title(&t.value)),
        entries,
    })
}

pub struct RssFeed {
    endpoint: FeedEndpoint,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http(reqwest::Client),
}

impl RssFeed {
    /// Serve a fixed document instead of polling the endpoint.
    pub fn from_fixture(endpoint: FeedEndpoint, xml: &str) -> Self {
        Self {
            endpoint,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_endpoint(endpoint: FeedEndpoint, client: reqwest::Client) -> Self {
        Self {
            endpoint,
            mode: Mode::Http(client),
        }
    }

    fn parse_timed(&self, xml: &str) -> Result<FeedDocument> {
        let t0 = std::time::Instant::now();
        let doc = parse_feed_document(xml)
            .with_context(|| format!("parsing feed {}", self.endpoint.url))?;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("ingest_entries_total").increment(doc.entries.len() as u64);
        Ok(doc)
    }
}

/// Shared HTTP client for feed polling.
pub fn feed_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("market-news-pipeline/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building feed http client")
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn fetch_document(&self) -> Result<FeedDocument> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_timed(s),
            Mode::Http(client) => {
                let resp = client
                    .get(&self.endpoint.url)
                    .send()
                    .await
                    .with_context(|| format!("GET {}", self.endpoint.url))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(anyhow!("GET {} returned HTTP {status}", self.endpoint.url));
                }
                let body = resp.text().await.context("feed http .text()")?;
                self.parse_timed(&body)
            }
        }
    }

    fn endpoint(&self) -> &FeedEndpoint {
        &self.endpoint
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&laquo;", "«")
        .replace("&raquo;", "»")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_rfc2822_and_rfc3339() {
        let a = parse_feed_date("Tue, 14 Oct 2025 09:30:00 +0300").unwrap();
        assert_eq!((a.day(), a.hour()), (14, 6));
        let b = parse_feed_date("2025-10-14T06:30:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_feed_date("yesterday").is_none());
    }

    #[test]
    fn atom_document_yields_entries() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Relay channel</title>
  <entry>
    <title>Sberbank raises dividend guidance</title>
    <link rel="alternate" href="https://t.me/channel/101"/>
    <published>2025-10-14T06:30:00Z</published>
    <summary>Board &lt;b&gt;proposes&lt;/b&gt; a higher payout.</summary>
  </entry>
</feed>"#;
        let doc = parse_feed_document(xml).unwrap();
        assert_eq!(doc.channel_title.as_deref(), Some("Relay channel"));
        assert_eq!(doc.entries.len(), 1);
        let e = &doc.entries[0];
        assert_eq!(e.link.as_deref(), Some("https://t.me/channel/101"));
        assert_eq!(e.excerpt, "Board proposes a higher payout.");
        assert!(e.published_at.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed_document("not xml at all").is_err());
    }
}
