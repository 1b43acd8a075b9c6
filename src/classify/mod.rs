//! Classifier client: one model call per queued article, tolerant JSON
//! extraction from the reply, then field validation.
//!
//! Failures never propagate: a timeout, a non-2xx status or an unparseable
//! reply turns into [`ClassifyOutcome::Skip`] (or a heuristic verdict when the
//! profile says so) and the batch moves on.

pub mod backend;
pub mod extract;
pub mod normalize;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::companies::CompanyId;
use crate::store::QueueItem;
use backend::{ChatRequest, DynBackend};
use extract::extract_json;
use normalize::{Level, Tone};

/// Which instruction the model receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    /// Asks for a `skip` flag on articles that are not business news.
    Screening,
    /// Asks for a `relevance` grade instead of a skip flag.
    Relevance,
}

/// What to do when the call fails or the reply has no usable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Skip,
    Heuristic,
}

/// Model + prompt parameters, picked once when the client is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierProfile {
    pub model: String,
    pub template: PromptTemplate,
    pub excerpt_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub batch_size: usize,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl ClassifierProfile {
    /// Screening prompt on a small instruct model; used for full drains.
    pub fn fast() -> Self {
        Self {
            model: "Qwen2.5-7B-Instruct-1M".to_string(),
            template: PromptTemplate::Screening,
            excerpt_chars: 1500,
            temperature: 0.3,
            max_tokens: 500,
            timeout_secs: 30,
            batch_size: 6,
            stop: Vec::new(),
            failure_policy: FailurePolicy::Skip,
        }
    }

    /// Relevance prompt on a reasoning model; small batches per cycle.
    pub fn detailed() -> Self {
        Self {
            model: "openai/gpt-oss-20b".to_string(),
            template: PromptTemplate::Relevance,
            excerpt_chars: 2000,
            temperature: 0.1,
            max_tokens: 400,
            timeout_secs: 45,
            batch_size: 3,
            stop: vec!["```".to_string(), "---".to_string()],
            failure_policy: FailurePolicy::Skip,
        }
    }
}

/// Normalized fields of an accepted classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub tone: Tone,
    pub impact_level: Level,
    pub impact_score: u8,
    pub summary: String,
    pub relevance: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome {
    Skip { reason: String },
    Classified(Assessment),
}

pub const UNPARSEABLE_REASON: &str = "unparseable response";

/// Default exclusion words (horoscopes, recipes, fashion) in Russian and English.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "гороскоп",
    "астролог",
    "знак зодиак",
    "рецепт",
    "кулинар",
    "готовка",
    "мода",
    "стиль",
    "косметика",
    "horoscope",
    "astrolog",
    "zodiac",
    "recipe",
    "cooking",
    "fashion",
    "cosmetic",
];

/// First exclude word found in the lower-cased text.
pub fn prefilter_hit<'a>(text: &str, excludes: &'a [String]) -> Option<&'a str> {
    let lower = text.to_lowercase();
    excludes
        .iter()
        .map(String::as_str)
        .find(|w| !w.is_empty() && lower.contains(&w.to_lowercase()))
}

pub struct Classifier {
    profile: ClassifierProfile,
    backend: DynBackend,
}

impl Classifier {
    pub fn new(profile: ClassifierProfile, backend: DynBackend) -> Self {
        Self { profile, backend }
    }

    pub fn profile(&self) -> &ClassifierProfile {
        &self.profile
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn build_prompt(&self, item: &QueueItem, company: Option<CompanyId>) -> String {
        let text = item.full_text();
        let excerpt: String = text.chars().take(self.profile.excerpt_chars).collect();
        match self.profile.template {
            PromptTemplate::Screening => {
                let company_line = company
                    .map(|c| format!("RELATED COMPANY: {c}\n\n"))
                    .unwrap_or_default();
                format!(
                    "NEWS ANALYSIS: {title}\n\n\
                     TEXT: {excerpt}\n\n\
                     {company_line}\
                     Analyze the article for its effect on the company's stock. \
                     If it is not a business or market article, set \"skip\" to true.\n\
                     Return ONLY a JSON object, no extra text:\n\
                     {{\n  \"tone\": \"positive/negative/neutral\",\n  \
                     \"impact_level\": \"high/medium/low\",\n  \
                     \"impact_score\": 10-100,\n  \
                     \"summary\": \"short description\",\n  \
                     \"skip\": false\n}}",
                    title = item.title,
                )
            }
            PromptTemplate::Relevance => {
                let company = company.map(|c| c.ticker()).unwrap_or("UNKNOWN");
                format!(
                    "NEWS ANALYSIS FOR COMPANY: {company}\n\n\
                     TITLE: {title}\n\
                     TEXT: {excerpt}\n\n\
                     ANALYZE AND RETURN JSON:\n\
                     {{\n  \"tone\": \"positive|negative|neutral\",\n  \
                     \"impact_level\": \"high|medium|low\",\n  \
                     \"impact_score\": number_10_100,\n  \
                     \"summary\": \"short_summary\",\n  \
                     \"relevance\": \"high|medium|low\"\n}}\n\n\
                     ANSWER IN JSON ONLY, NO EXTRA WORDS!",
                    title = item.title,
                )
            }
        }
    }

    /// Classify one item. Never fails; problems become `Skip` or a heuristic verdict.
    #[tracing::instrument(level = "debug", skip_all, fields(link = %item.link))]
    pub async fn classify(&self, item: &QueueItem, company: Option<CompanyId>) -> ClassifyOutcome {
        let req = ChatRequest {
            model: self.profile.model.clone(),
            prompt: self.build_prompt(item, company),
            temperature: self.profile.temperature,
            max_tokens: self.profile.max_tokens,
            stop: self.profile.stop.clone(),
        };

        let reply = match self.backend.complete(&req).await {
            Ok(r) => r,
            Err(e) => {
                counter!("classify_backend_errors_total").increment(1);
                tracing::warn!(error = %e, backend = self.backend.name(), "classifier call failed");
                return self.on_failure(item, e.to_string());
            }
        };

        // Prose in `content` can hide the object in `reasoning`.
        let Some(obj) = reply.candidates().find_map(extract_json) else {
            counter!("classify_unparseable_total").increment(1);
            let snippet: String = reply.content.chars().take(300).collect();
            tracing::debug!(raw = %snippet, "no json object in model reply");
            return self.on_failure(item, UNPARSEABLE_REASON.to_string());
        };

        if normalize::wants_skip(&obj) {
            let reason = obj
                .get("reason")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("model requested skip")
                .to_string();
            return ClassifyOutcome::Skip { reason };
        }

        let relevance = match self.profile.template {
            PromptTemplate::Relevance => Some(Level::parse(obj.get("relevance"))),
            PromptTemplate::Screening => obj.get("relevance").map(|v| Level::parse(Some(v))),
        };

        ClassifyOutcome::Classified(Assessment {
            tone: Tone::parse(obj.get("tone")),
            impact_level: Level::parse(obj.get("impact_level")),
            impact_score: normalize::impact_score(obj.get("impact_score")),
            summary: normalize::summary(obj.get("summary"), &item.title),
            relevance,
        })
    }

    fn on_failure(&self, item: &QueueItem, reason: String) -> ClassifyOutcome {
        match self.profile.failure_policy {
            FailurePolicy::Skip => ClassifyOutcome::Skip { reason },
            FailurePolicy::Heuristic => {
                tracing::debug!(%reason, "using keyword heuristic");
                ClassifyOutcome::Classified(heuristic_assessment(&item.title, &item.full_text()))
            }
        }
    }
}

const HEURISTIC_NEGATIVE: &[&str] = &[
    "штраф", "убыток", "снижение", "fined", "penalty", "loss", "decline",
];
const HEURISTIC_POSITIVE: &[&str] = &["рост", "прибыль", "контракт", "growth", "profit", "contract"];

/// Keyword verdict used when the model is unavailable.
pub fn heuristic_assessment(title: &str, text: &str) -> Assessment {
    let lower = text.to_lowercase();
    let short: String = title.chars().take(80).collect();
    if HEURISTIC_NEGATIVE.iter().any(|w| lower.contains(w)) {
        return Assessment {
            tone: Tone::Negative,
            impact_level: Level::High,
            impact_score: 75,
            summary: format!("Negative news: {short}"),
            relevance: Some(Level::High),
        };
    }
    if HEURISTIC_POSITIVE.iter().any(|w| lower.contains(w)) {
        return Assessment {
            tone: Tone::Positive,
            impact_level: Level::High,
            impact_score: 80,
            summary: format!("Positive news: {short}"),
            relevance: Some(Level::High),
        };
    }
    Assessment {
        tone: Tone::Neutral,
        impact_level: Level::Low,
        impact_score: 40,
        summary: normalize::title_summary(title),
        relevance: Some(Level::Low),
    }
}
