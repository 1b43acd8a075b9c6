// src/pipeline.rs
//! Fetch → queue → classify → store, as one owned object.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::classify::normalize::Tone;
use crate::classify::{prefilter_hit, Classifier, ClassifyOutcome};
use crate::companies;
use crate::config::{PipelineConfig, DEFAULT_CHECKPOINT_EVERY};
use crate::ingest::types::FeedSource;
use crate::ingest::{self, FetchReport};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::scheduler::CycleJob;
use crate::store::{ClassifiedItem, ResultStore, WorkQueue};

/// How much of the queue one cycle consumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// One batch of the configured size.
    #[default]
    Batch,
    /// The whole queue, under the retry policy.
    Drain,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("classify_processed_total", "Items accepted into the result store.");
        describe_counter!("classify_skipped_total", "Items skipped by the model or on failure.");
        describe_counter!("classify_prefiltered_total", "Items dropped by the exclude list.");
        describe_counter!("classify_checkpoints_total", "Mid-batch result store saves.");
        describe_counter!("classify_backend_errors_total", "Classifier transport errors.");
        describe_counter!("classify_unparseable_total", "Replies without a usable object.");
        describe_gauge!("classify_results_len", "Result store size after the last batch.");
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToneDistribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl ToneDistribution {
    fn count(&mut self, tone: Tone) {
        match tone {
            Tone::Positive => self.positive += 1,
            Tone::Negative => self.negative += 1,
            Tone::Neutral => self.neutral += 1,
        }
    }
}

/// Statistics for one classification batch (or several merged).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    /// Subset of `skipped` dropped by the exclude list before any model call.
    pub prefiltered: usize,
    pub elapsed_ms: u64,
    pub items_per_minute: f64,
    pub tones: ToneDistribution,
    pub store_len: usize,
    pub queue_remaining: usize,
}

impl BatchReport {
    /// Fold a later batch into this one. Sizes come from the later batch.
    pub fn merge(&mut self, later: BatchReport) {
        self.total += later.total;
        self.processed += later.processed;
        self.skipped += later.skipped;
        self.prefiltered += later.prefiltered;
        self.elapsed_ms += later.elapsed_ms;
        self.items_per_minute = rate(self.total, self.elapsed_ms);
        self.tones.positive += later.tones.positive;
        self.tones.negative += later.tones.negative;
        self.tones.neutral += later.tones.neutral;
        self.store_len = later.store_len;
        self.queue_remaining = later.queue_remaining;
    }
}

fn rate(items: usize, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    items as f64 * 60_000.0 / elapsed_ms as f64
}

/// Outcome of one Fetch→Classify cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: CycleMode,
    pub fetch: FetchReport,
    pub batch: BatchReport,
}

pub struct Pipeline {
    sources: Vec<Box<dyn FeedSource>>,
    queue: WorkQueue,
    results_path: PathBuf,
    classifier: Classifier,
    excludes: Vec<String>,
    checkpoint_every: usize,
    mode: CycleMode,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Box<dyn FeedSource>>,
        queue: WorkQueue,
        results_path: impl Into<PathBuf>,
        classifier: Classifier,
    ) -> Self {
        Self {
            sources,
            queue,
            results_path: results_path.into(),
            classifier,
            excludes: Vec::new(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            mode: CycleMode::Batch,
            retry: RetryPolicy::default(),
        }
    }

    /// Wire everything from configuration (HTTP feeds, configured backend).
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let sources = ingest::http_sources(
            &cfg.feeds,
            std::time::Duration::from_secs(cfg.storage.feed_timeout_secs),
        )?;
        let classifier = cfg.classifier.build_classifier()?;
        Ok(Self::new(
            sources,
            WorkQueue::new(cfg.storage.queue_path()),
            cfg.storage.results_path(),
            classifier,
        )
        .with_excludes(cfg.classifier.excludes.clone())
        .with_checkpoint_every(cfg.classifier.checkpoint_every)
        .with_mode(cfg.scheduler.mode)
        .with_retry(cfg.retry.policy()))
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_checkpoint_every(mut self, k: usize) -> Self {
        self.checkpoint_every = if k == 0 { DEFAULT_CHECKPOINT_EVERY } else { k };
        self
    }

    pub fn with_mode(mut self, mode: CycleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn mode(&self) -> CycleMode {
        self.mode
    }

    pub fn open_results(&self) -> Result<ResultStore> {
        ResultStore::open(&self.results_path)
    }

    pub async fn fetch(&self) -> Result<FetchReport> {
        ingest::run_once(&self.sources, &self.queue).await
    }

    /// Classify up to `limit` queued items (default: the profile batch size).
    ///
    /// Items are consumed whatever the outcome. Every `checkpoint_every`
    /// accepted items the Result Store is saved and the items handled so far
    /// (skips included) leave the queue, so a restart resumes after the last
    /// checkpoint instead of storing those links twice.
    pub async fn process_batch(&self, limit: Option<usize>) -> Result<BatchReport> {
        ensure_metrics_described();
        let limit = limit.unwrap_or(self.classifier.profile().batch_size);
        let batch = self.queue.peek_batch(limit)?;
        let mut report = BatchReport {
            total: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            let store = self.open_results()?;
            report.store_len = store.len();
            tracing::info!("queue is empty, nothing to classify");
            return Ok(report);
        }

        let t0 = Instant::now();
        let mut store = self.open_results()?;
        let mut since_checkpoint = 0usize;
        let mut dequeued = 0usize;

        tracing::info!(
            items = batch.len(),
            model = %self.classifier.profile().model,
            "classifying batch"
        );

        for (i, item) in batch.iter().enumerate() {
            let text = item.full_text();
            if let Some(word) = prefilter_hit(&text, &self.excludes) {
                tracing::debug!(link = %item.link, %word, "excluded by prefilter");
                report.skipped += 1;
                report.prefiltered += 1;
                continue;
            }

            let company = companies::tag(&text);
            match self.classifier.classify(item, company).await {
                ClassifyOutcome::Skip { reason } => {
                    tracing::info!(n = i + 1, link = %item.link, %reason, "skipped");
                    report.skipped += 1;
                }
                ClassifyOutcome::Classified(a) => {
                    tracing::info!(
                        n = i + 1,
                        link = %item.link,
                        tone = a.tone.as_str(),
                        score = a.impact_score,
                        company = company.map(|c| c.ticker()).unwrap_or("-"),
                        "classified"
                    );
                    report.tones.count(a.tone);
                    report.processed += 1;
                    store.prepend(ClassifiedItem::from_queue(item, company, a, Utc::now()));
                    since_checkpoint += 1;
                    if since_checkpoint >= self.checkpoint_every {
                        store.save().context("checkpointing result store")?;
                        dequeued += self
                            .queue
                            .remove_batch(i + 1 - dequeued)
                            .context("trimming queue at checkpoint")?;
                        counter!("classify_checkpoints_total").increment(1);
                        tracing::debug!(saved = store.len(), dequeued, "checkpoint");
                        since_checkpoint = 0;
                    }
                }
            }
        }

        store.save().context("saving result store")?;
        self.queue.remove_batch(batch.len() - dequeued)?;

        report.elapsed_ms = t0.elapsed().as_millis() as u64;
        report.items_per_minute = rate(report.total, report.elapsed_ms);
        report.store_len = store.len();
        report.queue_remaining = self.queue.len()?;

        counter!("classify_processed_total").increment(report.processed as u64);
        counter!("classify_skipped_total").increment(report.skipped as u64);
        counter!("classify_prefiltered_total").increment(report.prefiltered as u64);
        gauge!("classify_results_len").set(report.store_len as f64);

        tracing::info!(
            total = report.total,
            processed = report.processed,
            skipped = report.skipped,
            positive = report.tones.positive,
            negative = report.tones.negative,
            neutral = report.tones.neutral,
            store_len = report.store_len,
            queue_remaining = report.queue_remaining,
            "batch finished"
        );
        Ok(report)
    }

    /// One pass over everything queued right now.
    pub async fn drain_once(&self) -> Result<BatchReport> {
        let pending = self.queue.len()?;
        self.process_batch(Some(pending)).await
    }

    /// Drain the queue under the retry policy; batches are merged.
    pub async fn drain_with_retry(&self) -> Result<BatchReport, RetryError> {
        let outputs = run_with_retry(
            &self.retry,
            |_| self.drain_once(),
            || self.queue.len(),
        )
        .await?;
        let mut total = BatchReport::default();
        for r in outputs {
            total.merge(r);
        }
        Ok(total)
    }

    /// Fetch, then classify one batch or drain, per `mode`.
    pub async fn cycle(&self, mode: CycleMode) -> Result<CycleReport> {
        let started_at = Utc::now();
        let fetch = self.fetch().await?;
        let batch = match mode {
            CycleMode::Batch => self.process_batch(None).await?,
            CycleMode::Drain => self.drain_with_retry().await?,
        };
        Ok(CycleReport {
            started_at,
            finished_at: Utc::now(),
            mode,
            fetch,
            batch,
        })
    }
}

#[async_trait]
impl CycleJob for Pipeline {
    async fn run_cycle(&self) -> Result<CycleReport> {
        self.cycle(self.mode).await
    }
}
