//! Chat-completion backends: the real OpenAI-compatible endpoint and a
//! deterministic mock for tests and dry runs.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// One request to the text-generation endpoint.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

/// Raw model output. Reasoning models may put the answer in `reasoning`
/// while `content` holds prose, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub reasoning: Option<String>,
}

impl ChatReply {
    /// Texts to search for an answer, `content` first.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.content.as_str())
            .chain(self.reasoning.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

impl From<String> for ChatReply {
    fn from(content: String) -> Self {
        Self {
            content,
            reasoning: None,
        }
    }
}

/// Low-level provider: returns the raw model reply or an error.
pub trait ChatBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        req: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatReply>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

pub type DynBackend = Arc<dyn ChatBackend>;

/// OpenAI-compatible `/v1/chat/completions` endpoint (LM Studio, vLLM, OpenAI).
pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("market-news-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building classifier http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl ChatBackend for OpenAiCompatBackend {
    fn complete<'a>(
        &'a self,
        req: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatReply>> + Send + 'a>> {
        Box::pin(async move {
            let body = Req {
                model: &req.model,
                messages: vec![Msg {
                    role: "user",
                    content: &req.prompt,
                }],
                temperature: req.temperature,
                max_tokens: req.max_tokens,
                stop: &req.stop,
            };

            let mut call = self.http.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                call = call.bearer_auth(key);
            }
            let resp = call.send().await.map_err(|e| {
                if e.is_timeout() {
                    anyhow!("request timed out")
                } else {
                    anyhow!("request failed: {e}")
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(200).collect();
                return Err(anyhow!("HTTP {}: {snippet}", status.as_u16()));
            }

            let parsed: Resp = resp.json().await.context("decoding completion body")?;
            let msg = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or_else(|| anyhow!("completion has no choices"))?;
            Ok(ChatReply {
                content: msg.content.unwrap_or_default(),
                reasoning: msg.reasoning.filter(|r| !r.trim().is_empty()),
            })
        })
    }

    fn name(&self) -> &'static str {
        "openai-compat"
    }
}

/// Replays scripted replies in order, then repeats `fallback`.
/// `Err` entries simulate transport failures.
pub struct MockBackend {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(replies: Vec<Result<String, String>>, fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: fallback.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl ChatBackend for MockBackend {
    fn complete<'a>(
        &'a self,
        req: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatReply>> + Send + 'a>> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(req.prompt.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        Box::pin(async move { next.map(ChatReply::from).map_err(|e| anyhow!(e)) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
