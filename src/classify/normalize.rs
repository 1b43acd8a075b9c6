// src/classify/normalize.rs
//! Validation of model-produced fields. Every closed enum falls back to a
//! fixed default instead of carrying garbage forward.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_IMPACT_SCORE: u8 = 50;
pub const MIN_IMPACT_SCORE: i64 = 10;
pub const MAX_IMPACT_SCORE: i64 = 100;
const SUMMARY_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Tone {
    pub fn parse(raw: Option<&Value>) -> Self {
        match lowered(raw).as_deref() {
            Some("positive") => Tone::Positive,
            Some("negative") => Tone::Negative,
            _ => Tone::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Positive => "positive",
            Tone::Negative => "negative",
            Tone::Neutral => "neutral",
        }
    }
}

/// Three-step scale shared by `impact_level` and `relevance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    #[default]
    Medium,
    Low,
}

impl Level {
    pub fn parse(raw: Option<&Value>) -> Self {
        match lowered(raw).as_deref() {
            Some("high") => Level::High,
            Some("low") => Level::Low,
            _ => Level::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::High => "high",
            Level::Medium => "medium",
            Level::Low => "low",
        }
    }
}

fn lowered(raw: Option<&Value>) -> Option<String> {
    raw.and_then(Value::as_str).map(|s| s.trim().to_lowercase())
}

/// Integer score in [10, 100]; anything else becomes 50.
///
/// Strings are read like a lenient integer parse: optional sign then leading
/// digits, so `"85 points"` is 85 and `"very high"` is the default.
pub fn impact_score(raw: Option<&Value>) -> u8 {
    let n = match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => leading_int(s),
        _ => None,
    };
    match n {
        Some(v) if (MIN_IMPACT_SCORE..=MAX_IMPACT_SCORE).contains(&v) => v as u8,
        _ => DEFAULT_IMPACT_SCORE,
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let t = s.trim_start();
    let (sign, rest) = match t.as_bytes().first() {
        Some(b'-') => (-1, &t[1..]),
        Some(b'+') => (1, &t[1..]),
        _ => (1, t),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|v| v * sign)
}

/// Model summary if non-empty, else derived from the title.
pub fn summary(raw: Option<&Value>, title: &str) -> String {
    if let Some(s) = raw.and_then(Value::as_str).map(str::trim) {
        if !s.is_empty() {
            return s.to_string();
        }
    }
    title_summary(title)
}

/// The trimmed title, cut to 100 characters. `...` marks a cut and is not
/// added to titles that already fit.
pub fn title_summary(title: &str) -> String {
    let title = title.trim();
    if title.chars().count() > SUMMARY_TITLE_CHARS {
        let head: String = title.chars().take(SUMMARY_TITLE_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        title.to_string()
    }
}

/// `skip: true` (or the string `"true"`).
pub fn wants_skip(obj: &Map<String, Value>) -> bool {
    match obj.get("skip") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
