//! Recover one JSON object from free-form model output.
//!
//! Strategies run in a fixed order. A strategy that matches but yields text
//! that does not parse as an object falls through to the next one. When all
//! of them fail, fence markers are stripped from the whole response and the
//! remainder is parsed as a last resort.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// One way of locating a candidate JSON block in model output.
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    /// Candidate text, if the pattern matches at all.
    fn capture<'a>(&self, text: &'a str) -> Option<&'a str>;
}

/// Regex-backed strategy; `group` 0 means the whole match.
pub struct PatternStrategy {
    name: &'static str,
    re: Regex,
    group: usize,
}

impl PatternStrategy {
    fn new(name: &'static str, pattern: &str, group: usize) -> Self {
        Self {
            name,
            re: Regex::new(pattern).expect("static extraction pattern"),
            group,
        }
    }

    /// ```` ```json\n{...}\n``` ````
    pub fn labeled_fence() -> Self {
        Self::new("labeled_fence", r"(?i)```json[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```", 1)
    }

    /// ```` ```\n{...}\n``` ````
    pub fn unlabeled_fence() -> Self {
        Self::new("unlabeled_fence", r"```[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```", 1)
    }

    /// ```` ```json {...}``` ```` on one line, no newline before the closing fence.
    pub fn inline_fence() -> Self {
        Self::new("inline_fence", r"(?i)```(?:json)?\s*([\s\S]*?)```", 1)
    }

    /// First `{` through last `}`.
    pub fn brace_span() -> Self {
        Self::new("brace_span", r"\{[\s\S]*\}", 0)
    }
}

impl ExtractStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capture<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.re
            .captures(text)
            .and_then(|c| c.get(self.group))
            .map(|m| m.as_str())
    }
}

static DEFAULT_STRATEGIES: Lazy<Vec<Box<dyn ExtractStrategy>>> = Lazy::new(|| {
    vec![
        Box::new(PatternStrategy::labeled_fence()),
        Box::new(PatternStrategy::unlabeled_fence()),
        Box::new(PatternStrategy::inline_fence()),
        Box::new(PatternStrategy::brace_span()),
    ]
});

pub fn default_strategies() -> &'static [Box<dyn ExtractStrategy>] {
    &DEFAULT_STRATEGIES
}

fn parse_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

/// Run `strategies` in order, then the fence-stripping fallback.
pub fn extract_with(strategies: &[Box<dyn ExtractStrategy>], content: &str) -> Option<JsonObject> {
    if content.trim().is_empty() {
        return None;
    }
    for s in strategies {
        if let Some(candidate) = s.capture(content) {
            if let Some(obj) = parse_object(candidate) {
                tracing::trace!(strategy = s.name(), "extracted json object");
                return Some(obj);
            }
            tracing::trace!(strategy = s.name(), "pattern matched but did not parse");
        }
    }
    parse_object(&content.replace("```", ""))
}

pub fn extract_json(content: &str) -> Option<JsonObject> {
    extract_with(default_strategies(), content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BODY: &str = r#"{"tone":"negative","impact_level":"high","impact_score":80,"summary":"Fine imposed"}"#;

    fn expected() -> JsonObject {
        json!({"tone":"negative","impact_level":"high","impact_score":80,"summary":"Fine imposed"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn each_strategy_in_isolation() {
        let labeled = format!("Here you go:\n```json\n{BODY}\n```\nDone.");
        let unlabeled = format!("```\n{BODY}\n```");
        let inline = format!("```json {BODY}```");
        let prose = format!("Sure! The analysis is {BODY} hope that helps.");

        let cases: [(PatternStrategy, &str); 4] = [
            (PatternStrategy::labeled_fence(), &labeled),
            (PatternStrategy::unlabeled_fence(), &unlabeled),
            (PatternStrategy::inline_fence(), &inline),
            (PatternStrategy::brace_span(), &prose),
        ];
        for (strategy, text) in cases {
            let got = strategy.capture(text).and_then(parse_object);
            assert_eq!(got, Some(expected()), "strategy {}", strategy.name());
        }
    }

    #[test]
    fn labeled_unlabeled_and_prose_recover_the_same_object() {
        let a = extract_json(&format!("```json\n{BODY}\n```")).unwrap();
        let b = extract_json(&format!("```\n{BODY}\n```")).unwrap();
        let c = extract_json(&format!("Result: {BODY}. End of answer.")).unwrap();
        assert_eq!(a, expected());
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn matched_but_broken_block_falls_through() {
        // Both fence strategies match a block that is not JSON; the brace span wins.
        let text = format!("```json\ntone: negative\n```\n{BODY}");
        assert_eq!(extract_json(&text), Some(expected()));
    }

    #[test]
    fn fence_stripping_fallback() {
        assert_eq!(extract_with(&[], &format!("```\n{BODY}\n```")), Some(expected()));
        // A stray fence inside the brace span breaks it; stripping repairs it.
        let text = r#"{"tone":"negative","impact_level":"high","impact_score":80,"summary":"Fine imposed"```}"#;
        assert_eq!(extract_json(text), Some(expected()));
    }

    #[test]
    fn nothing_parseable() {
        assert!(extract_json("").is_none());
        assert!(extract_json("I cannot analyze this article.").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("{ broken").is_none());
    }
}
