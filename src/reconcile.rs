// src/reconcile.rs
//! Offline duplicate repair for the Result Store.
//!
//! Two items are duplicates when their normalized titles and UTC publication
//! days match. Within a group the most recently published item is kept. The
//! pass is planned fully in memory, checked, and only then written: backup of
//! the original collection, the filtered collection, then the report.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;

use crate::store::backup::{timestamped_name, BackupSink};
use crate::store::{ClassifiedItem, ResultStore};

pub const TITLE_KEY_CHARS: usize = 100;
pub const NO_DATE: &str = "nodate";
pub const LARGEST_GROUPS: usize = 10;
pub const SAMPLE_TITLE_CHARS: usize = 80;

pub const BACKUP_PREFIX: &str = "news_fix_backup";
pub const REPORT_PREFIX: &str = "duplicates_fix_report";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("keep and remove sets overlap on {0} item(s)")]
    Overlap(usize),
    #[error("count mismatch: kept {kept} + removed {removed} != original {original}")]
    CountMismatch {
        kept: usize,
        removed: usize,
        original: usize,
    },
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("reconcile_runs_total", "Reconciler runs that wrote results.");
        describe_counter!("reconcile_removed_total", "Duplicates removed by the reconciler.");
    });
}

/// Lower-case, non-alphanumerics to spaces, whitespace collapsed, capped.
pub fn normalize_title(title: &str) -> String {
    let mapped: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(TITLE_KEY_CHARS)
        .collect()
}

/// `<normalized title>|<YYYY-MM-DD or nodate>`
pub fn group_key(title: &str, published_at: Option<DateTime<Utc>>) -> String {
    let day = published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| NO_DATE.to_string());
    format!("{}|{day}", normalize_title(title))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSample {
    pub count: usize,
    pub sample_title: String,
    pub sample_date: Option<DateTime<Utc>>,
    pub sample_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub fixed_at: DateTime<Utc>,
    pub original_count: usize,
    pub final_count: usize,
    pub removed_count: usize,
    pub kept_count: usize,
    pub groups_count: usize,
    pub duplicate_groups_count: usize,
    pub largest_groups: Vec<GroupSample>,
}

/// Indices into the input; `keep` is in original store order.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub keep: Vec<usize>,
    pub remove: Vec<usize>,
    pub report: ReconcileReport,
}

/// Compute the keep/remove split without touching storage.
pub fn plan(items: &[ClassifiedItem], now: DateTime<Utc>) -> Result<ReconcilePlan, ReconcileError> {
    // Newest first; undated items sort last. Stable, so ties keep store order.
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(items[i].published_at));

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    for i in order {
        let key = group_key(&items[i].title, items[i].published_at);
        match slot.get(&key) {
            Some(&g) => groups[g].push(i),
            None => {
                slot.insert(key, groups.len());
                groups.push(vec![i]);
            }
        }
    }

    let mut keep: Vec<usize> = groups.iter().map(|g| g[0]).collect();
    let mut remove: Vec<usize> = groups.iter().flat_map(|g| g[1..].iter().copied()).collect();

    let keep_set: HashSet<usize> = keep.iter().copied().collect();
    let overlap = remove.iter().filter(|i| keep_set.contains(i)).count();
    if overlap > 0 {
        return Err(ReconcileError::Overlap(overlap));
    }
    if keep.len() + remove.len() != items.len() {
        return Err(ReconcileError::CountMismatch {
            kept: keep.len(),
            removed: remove.len(),
            original: items.len(),
        });
    }
    keep.sort_unstable();
    remove.sort_unstable();

    let mut dupes: Vec<&Vec<usize>> = groups.iter().filter(|g| g.len() > 1).collect();
    dupes.sort_by(|a, b| b.len().cmp(&a.len()));
    let largest_groups = dupes
        .iter()
        .take(LARGEST_GROUPS)
        .map(|g| {
            let first = &items[g[0]];
            GroupSample {
                count: g.len(),
                sample_title: first.title.chars().take(SAMPLE_TITLE_CHARS).collect(),
                sample_date: first.published_at,
                sample_source: first.source.clone(),
            }
        })
        .collect();

    let report = ReconcileReport {
        fixed_at: now,
        original_count: items.len(),
        final_count: keep.len(),
        removed_count: remove.len(),
        kept_count: keep.len(),
        groups_count: groups.len(),
        duplicate_groups_count: dupes.len(),
        largest_groups,
    };
    Ok(ReconcilePlan { keep, remove, report })
}

/// Plan, verify and apply a reconciliation to `store`.
///
/// With `dry_run` nothing is written. An invariant failure aborts before any
/// write and surfaces as a [`ReconcileError`] inside the `anyhow::Error`.
pub fn reconcile(
    store: &mut ResultStore,
    sink: &dyn BackupSink,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    ensure_metrics_described();
    let items = store.all();
    let plan = plan(items, now)?;
    let report = plan.report;

    tracing::info!(
        original = report.original_count,
        kept = report.kept_count,
        removed = report.removed_count,
        groups = report.groups_count,
        duplicate_groups = report.duplicate_groups_count,
        dry_run,
        "reconcile planned"
    );
    if dry_run {
        return Ok(report);
    }

    let original = serde_json::to_string_pretty(items).context("serializing backup")?;
    let backup = sink.store(&timestamped_name(BACKUP_PREFIX, now), &original)?;
    tracing::info!(path = %backup.display(), "backup written");

    let filtered: Vec<ClassifiedItem> = plan.keep.iter().map(|&i| items[i].clone()).collect();
    store.replace_all(filtered);
    store.save().context("writing reconciled store")?;

    let body = serde_json::to_string_pretty(&report).context("serializing report")?;
    let path = sink.store(&timestamped_name(REPORT_PREFIX, now), &body)?;
    tracing::info!(path = %path.display(), "report written");

    counter!("reconcile_runs_total").increment(1);
    counter!("reconcile_removed_total").increment(report.removed_count as u64);
    Ok(report)
}
