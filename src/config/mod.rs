// src/config/mod.rs
//! Pipeline configuration.
//!
//! Lookup order:
//! 1) `$PIPELINE_CONFIG_PATH` (must exist)
//! 2) `config/pipeline.toml`
//! 3) `config/pipeline.json`
//! 4) built-in defaults
//!
//! `AI_API_URL` / `AI_MODEL` override the classifier endpoint and model after
//! the file is read. An `api_key` of `"ENV"` is resolved from `CLASSIFIER_API_KEY`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::classify::backend::{DynBackend, MockBackend, OpenAiCompatBackend};
use crate::classify::{Classifier, ClassifierProfile, FailurePolicy, DEFAULT_EXCLUDES};
use crate::ingest::default_feeds;
use crate::ingest::types::{FeedEndpoint, FeedKind};
use crate::pipeline::CycleMode;
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_API_URL: &str = "AI_API_URL";
pub const ENV_MODEL: &str = "AI_MODEL";
pub const ENV_API_KEY: &str = "CLASSIFIER_API_KEY";
/// `mock` swaps the HTTP backend for a canned reply (local dry runs, tests).
pub const ENV_TEST_MODE: &str = "CLASSIFIER_TEST_MODE";

const DEFAULT_TOML_PATH: &str = "config/pipeline.toml";
const DEFAULT_JSON_PATH: &str = "config/pipeline.json";

pub const MIN_EXCERPT_CHARS: usize = 200;
pub const MAX_EXCERPT_CHARS: usize = 8000;
pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub feeds: Vec<FeedEndpoint>,
    pub classifier: ClassifierConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            feeds: default_feeds(),
            classifier: ClassifierConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub queue_file: String,
    pub results_file: String,
    pub companies_file: String,
    /// Per-feed HTTP timeout.
    pub feed_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue_file: "news_queue.json".to_string(),
            results_file: "news.json".to_string(),
            companies_file: "companies.json".to_string(),
            feed_timeout_secs: 20,
        }
    }
}

impl StorageConfig {
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(&self.queue_file)
    }
    pub fn results_path(&self) -> PathBuf {
        self.data_dir.join(&self.results_file)
    }
    pub fn companies_path(&self) -> PathBuf {
        self.data_dir.join(&self.companies_file)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
    Fast,
    #[default]
    Detailed,
}

/// Classifier settings. Unset fields fall back to the chosen profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub profile: ProfileName,
    pub endpoint: String,
    pub model: Option<String>,
    /// Literal key, or "ENV" to read `CLASSIFIER_API_KEY`.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub excerpt_chars: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub stop: Option<Vec<String>>,
    pub failure_policy: Option<FailurePolicy>,
    /// Accepted items between Result Store checkpoints.
    pub checkpoint_every: usize,
    /// Pre-filter exclude words.
    pub excludes: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            profile: ProfileName::default(),
            endpoint: "http://localhost:1234/v1/chat/completions".to_string(),
            model: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            excerpt_chars: None,
            timeout_secs: None,
            batch_size: None,
            stop: None,
            failure_policy: None,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassifierConfig {
    /// Base profile with every configured override applied.
    pub fn resolved_profile(&self) -> ClassifierProfile {
        let mut p = match self.profile {
            ProfileName::Fast => ClassifierProfile::fast(),
            ProfileName::Detailed => ClassifierProfile::detailed(),
        };
        if let Some(m) = self.model.as_ref().filter(|m| !m.trim().is_empty()) {
            p.model = m.trim().to_string();
        }
        if let Some(t) = self.temperature {
            p.temperature = t;
        }
        if let Some(v) = self.max_tokens {
            p.max_tokens = v;
        }
        if let Some(v) = self.excerpt_chars {
            p.excerpt_chars = v;
        }
        if let Some(v) = self.timeout_secs {
            p.timeout_secs = v;
        }
        if let Some(v) = self.batch_size {
            p.batch_size = v;
        }
        if let Some(v) = &self.stop {
            p.stop = v.clone();
        }
        if let Some(v) = self.failure_policy {
            p.failure_policy = v;
        }
        p.batch_size = p.batch_size.max(1);
        p.excerpt_chars = p.excerpt_chars.clamp(MIN_EXCERPT_CHARS, MAX_EXCERPT_CHARS);
        p.timeout_secs = p.timeout_secs.max(1);
        p
    }

    fn backend(&self, profile: &ClassifierProfile) -> Result<DynBackend> {
        if std::env::var(ENV_TEST_MODE).is_ok_and(|v| v.eq_ignore_ascii_case("mock")) {
            tracing::warn!("classifier test mode: using mock backend");
            return Ok(Arc::new(MockBackend::fixed(
                r#"{"tone":"neutral","impact_level":"low","impact_score":10,"summary":"mock"}"#,
            )));
        }
        let backend = OpenAiCompatBackend::new(
            &self.endpoint,
            self.api_key.clone(),
            Duration::from_secs(profile.timeout_secs),
        )?;
        Ok(Arc::new(backend))
    }

    pub fn build_classifier(&self) -> Result<Classifier> {
        let profile = self.resolved_profile();
        let backend = self.backend(&profile)?;
        tracing::info!(
            model = %profile.model,
            endpoint = %self.endpoint,
            backend = backend.name(),
            batch_size = profile.batch_size,
            "classifier ready"
        );
        Ok(Classifier::new(profile, backend))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub period_secs: u64,
    pub initial_delay_secs: u64,
    pub mode: CycleMode,
    /// Cycle reports kept for `status()`.
    pub history: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_secs: 600,
            initial_delay_secs: 3,
            mode: CycleMode::Batch,
            history: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

impl PipelineConfig {
    /// Load from an explicit path. Format follows the extension; unknown
    /// extensions try TOML, then JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.finish()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Env var, then the conventional files, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        for p in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut cfg = Self::default();
        cfg.finish()?;
        Ok(cfg)
    }

    fn finish(&mut self) -> Result<()> {
        self.apply_env();
        self.resolve_api_key()?;
        self.sanitize();
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.classifier.endpoint = url.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var(ENV_MODEL) {
            if !model.trim().is_empty() {
                self.classifier.model = Some(model.trim().to_string());
            }
        }
    }

    fn resolve_api_key(&mut self) -> Result<()> {
        let wants_env = self
            .classifier
            .api_key
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case("env"));
        if wants_env {
            let key = std::env::var(ENV_API_KEY)
                .map_err(|_| anyhow!("Missing {ENV_API_KEY} env var"))?;
            self.classifier.api_key = Some(key);
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = 1;
        }
        if self.classifier.batch_size == Some(0) {
            self.classifier.batch_size = Some(1);
        }
        if let Some(n) = self.classifier.excerpt_chars {
            self.classifier.excerpt_chars = Some(n.clamp(MIN_EXCERPT_CHARS, MAX_EXCERPT_CHARS));
        }
        if self.classifier.checkpoint_every == 0 {
            self.classifier.checkpoint_every = DEFAULT_CHECKPOINT_EVERY;
        }
        if self.scheduler.period_secs == 0 {
            self.scheduler.period_secs = SchedulerConfig::default().period_secs;
        }
        self.feeds.retain(|f| !f.url.trim().is_empty());
        for f in &mut self.feeds {
            if f.kind == FeedKind::Rss {
                f.kind = FeedKind::infer(&f.url);
            }
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => toml::from_str(s)
            .map_err(anyhow::Error::from)
            .or_else(|_| serde_json::from_str(s).map_err(anyhow::Error::from))
            .map_err(|_| anyhow!("unsupported config format")),
    }
}
