// src/store/queue.rs
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{read_collection, write_atomic};
use crate::ingest::types::FeedKind;

/// Candidate article awaiting classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub source: String,
    pub title: String,
    /// Canonical dedup key; unique within the queue.
    pub link: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_text: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub kind: FeedKind,
}

impl QueueItem {
    /// Title and excerpt joined, as sent to the tagger and classifier.
    pub fn full_text(&self) -> String {
        format!("{} {}", self.title, self.raw_text).trim().to_string()
    }
}

/// Time-based id with a random suffix so two items minted in the same
/// millisecond do not collide.
pub fn mint_id(now: DateTime<Utc>) -> String {
    let salt: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{}-{salt:06x}", now.timestamp_millis())
}

/// Pending-work collection. Every operation is a whole-file read-modify-write.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    path: PathBuf,
}

impl WorkQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<QueueItem>> {
        read_collection(&self.path)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append unless the link is already queued. Returns whether it was added.
    pub fn append(&self, item: QueueItem) -> Result<bool> {
        Ok(self.append_all(vec![item])? == 1)
    }

    /// Append many items in one rewrite, dropping links already present
    /// (in the store or earlier in `items`). Returns the number added.
    pub fn append_all(&self, items: Vec<QueueItem>) -> Result<usize> {
        let mut queue = self.load()?;
        let mut seen: HashSet<String> = queue.iter().map(|q| q.link.clone()).collect();
        let mut added = 0usize;
        for it in items {
            if seen.insert(it.link.clone()) {
                queue.push(it);
                added += 1;
            }
        }
        if added > 0 {
            write_atomic(&self.path, &queue)?;
        }
        Ok(added)
    }

    /// First `n` items in insertion order, without removing them.
    pub fn peek_batch(&self, n: usize) -> Result<Vec<QueueItem>> {
        let mut queue = self.load()?;
        queue.truncate(n);
        Ok(queue)
    }

    /// Remove the first `n` items. Returns how many were actually removed.
    pub fn remove_batch(&self, n: usize) -> Result<usize> {
        let mut queue = self.load()?;
        let n = n.min(queue.len());
        if n == 0 {
            return Ok(0);
        }
        queue.drain(..n);
        write_atomic(&self.path, &queue)?;
        Ok(n)
    }

    /// Return everything and leave an empty queue behind.
    pub fn drain_all(&self) -> Result<Vec<QueueItem>> {
        let queue = self.load()?;
        write_atomic(&self.path, &Vec::<QueueItem>::new())?;
        Ok(queue)
    }
}
