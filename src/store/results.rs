// src/store/results.rs
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{read_collection, write_atomic};
use crate::classify::normalize::{Level, Tone};
use crate::classify::Assessment;
use crate::companies::CompanyId;
use crate::store::QueueItem;

/// Durable analysis record for one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedItem {
    pub id: String,
    pub source: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub company_tag: Option<CompanyId>,
    pub tone: Tone,
    pub impact_level: Level,
    pub impact_score: u8,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<Level>,
    pub classified_at: DateTime<Utc>,
}

impl ClassifiedItem {
    pub fn from_queue(
        item: &QueueItem,
        company: Option<CompanyId>,
        a: Assessment,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: item.id.clone(),
            source: item.source.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            published_at: item.published_at,
            company_tag: company,
            tone: a.tone,
            impact_level: a.impact_level,
            impact_score: a.impact_score,
            summary: a.summary,
            relevance: a.relevance,
            classified_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanyNewsStats {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Classified items, newest first. Loaded whole, saved whole.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
    items: Vec<ClassifiedItem>,
}

impl ResultStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = read_collection(&path)?;
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert at the head.
    pub fn prepend(&mut self, item: ClassifiedItem) {
        self.items.insert(0, item);
    }

    pub fn all(&self) -> &[ClassifiedItem] {
        &self.items
    }

    /// Replace the whole collection (used by the reconciler).
    pub fn replace_all(&mut self, items: Vec<ClassifiedItem>) {
        self.items = items;
    }

    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, &self.items)
    }

    pub fn filter_by_company(&self, id: CompanyId) -> Vec<&ClassifiedItem> {
        self.items
            .iter()
            .filter(|i| i.company_tag == Some(id))
            .collect()
    }

    /// Items published within `[start, end]`; undated items never match.
    pub fn filter_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&ClassifiedItem> {
        self.items
            .iter()
            .filter(|i| i.published_at.is_some_and(|p| p >= start && p <= end))
            .collect()
    }

    pub fn company_stats(&self, id: CompanyId) -> CompanyNewsStats {
        let news = self.filter_by_company(id);
        let count = |t: Tone| news.iter().filter(|n| n.tone == t).count();
        CompanyNewsStats {
            total: news.len(),
            positive: count(Tone::Positive),
            negative: count(Tone::Negative),
            neutral: count(Tone::Neutral),
            last_update: news.first().map(|n| n.classified_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn classified(link: &str, company: Option<CompanyId>, tone: Tone, day: u32) -> ClassifiedItem {
        let ts = Utc.with_ymd_and_hms(2025, 10, day, 12, 0, 0).unwrap();
        ClassifiedItem {
            id: link.into(),
            source: "Test".into(),
            title: format!("Title {link}"),
            link: link.into(),
            published_at: Some(ts),
            company_tag: company,
            tone,
            impact_level: Level::Medium,
            impact_score: 50,
            summary: "s".into(),
            relevance: None,
            classified_at: ts,
        }
    }

    #[test]
    fn prepend_keeps_newest_first_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("news.json");
        let mut s = ResultStore::open(&p).unwrap();
        s.prepend(classified("a", None, Tone::Neutral, 1));
        s.prepend(classified("b", None, Tone::Neutral, 2));
        s.save().unwrap();

        let s = ResultStore::open(&p).unwrap();
        let links: Vec<_> = s.all().iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["b", "a"]);
    }

    #[test]
    fn read_side_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ResultStore::open(dir.path().join("news.json")).unwrap();
        s.prepend(classified("a", Some(CompanyId::Sber), Tone::Positive, 1));
        s.prepend(classified("b", Some(CompanyId::Gazp), Tone::Negative, 5));
        s.prepend(classified("c", Some(CompanyId::Sber), Tone::Negative, 9));

        assert_eq!(s.filter_by_company(CompanyId::Sber).len(), 2);
        let from = Utc.with_ymd_and_hms(2025, 10, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 10, 9, 12, 0, 0).unwrap();
        let hits: Vec<_> = s
            .filter_by_date_range(from, to)
            .iter()
            .map(|i| i.link.clone())
            .collect();
        assert_eq!(hits, vec!["c".to_string(), "b".to_string()]);

        let st = s.company_stats(CompanyId::Sber);
        assert_eq!((st.total, st.positive, st.negative, st.neutral), (2, 1, 1, 0));
        assert_eq!(st.last_update.unwrap().format("%d").to_string(), "09");
    }

    #[test]
    fn serialized_shape_uses_camel_case_and_lowercase_enums() {
        let v = serde_json::to_value(classified("a", Some(CompanyId::Norn), Tone::Positive, 1)).unwrap();
        assert_eq!(v["companyTag"], "NORN");
        assert_eq!(v["tone"], "positive");
        assert_eq!(v["impactLevel"], "medium");
        assert!(v.get("relevance").is_none());
    }
}
