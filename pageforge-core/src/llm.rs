//! Text-generation backends.
//!
//! The pipeline treats the model as prompt in, text out. [`TextBackend`] is
//! that seam; the adapters below speak the Anthropic Messages API and the
//! Gemini `generateContent` API, and [`ScriptedBackend`] replays canned
//! responses for tests and dry runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Single-turn completion: system instruction plus user prompt.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

// ── Anthropic ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// Claude Messages API client.
pub struct AnthropicBackend {
    api_key: String,
    model: String,
    max_tokens: u32,
    api_base: String,
    http: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            api_base: "https://api.anthropic.com".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextBackend for AnthropicBackend {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [Message { role: "user", content: prompt }],
        });

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Backend(format!("Failed to call Claude API: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForgeError::Backend(format!("Claude API error {status}: {body}")));
        }

        let parsed = resp
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ForgeError::Backend(format!("Failed to parse Claude response: {e}")))?;

        Ok(parsed
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join(""))
    }
}

// ── Gemini ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// Google Gemini `generateContent` client.
pub struct GeminiBackend {
    api_key: String,
    model: String,
    api_base: String,
    http: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gemini-2.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                role: "system".to_string(),
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let resp = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ForgeError::Backend(format!("Failed to call Gemini API: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForgeError::Backend(format!("Gemini API error {status}: {body}")));
        }

        let parsed = resp
            .json::<GeminiResponse>()
            .await
            .map_err(|e| ForgeError::Backend(format!("Failed to parse Gemini response: {e}")))?;

        Ok(parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}

// ── Scripted ───────────────────────────────────────────────────────────

/// Replays queued responses in order and records every prompt it was given.
///
/// Once the queue is empty it keeps answering with the fallback response, if
/// one is set, otherwise it fails like an unreachable backend.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_fallback(mut self, response: &str) -> Self {
        self.fallback = Some(response.to_string());
        self
    }

    /// `(system, prompt)` pairs in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .push((system.to_string(), prompt.to_string()));
        let next = self.responses.lock().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| ForgeError::Backend("scripted backend has no responses left".into()))
    }
}
