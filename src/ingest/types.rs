// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin category of a feed endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Regular syndicated RSS/Atom feed published by a news outlet.
    #[default]
    Rss,
    /// Social channel re-published as a feed by a relay service.
    Relay,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Rss => "rss",
            FeedKind::Relay => "relay",
        }
    }
}

/// One configured feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub url: String,
    #[serde(default)]
    pub kind: FeedKind,
    /// Overrides the channel title as the item's `source`.
    #[serde(default)]
    pub label: Option<String>,
}

impl FeedEndpoint {
    pub fn rss(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FeedKind::Rss,
            label: None,
        }
    }

    pub fn relay(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FeedKind::Relay,
            label: Some(label.into()),
        }
    }
}

/// A parsed feed entry before dedup. Title/link may be missing in the wild.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub excerpt: String,
}

/// Output of one endpoint fetch.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub channel_title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_document(&self) -> Result<FeedDocument>;
    fn endpoint(&self) -> &FeedEndpoint;
}
