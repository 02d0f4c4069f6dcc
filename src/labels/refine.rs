//! Optional free-text label refinement.
//!
//! A [`LabelRewriter`] is an injected capability. Callers only use the
//! provided [`LabelRewriter::rewrite`], which is total: any failure or empty
//! answer falls back to the label it was given.

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Most sample titles passed to a rewriter.
pub const MAX_SAMPLES: usize = 5;

/// Default upper bound on a refined label, in characters.
pub const DEFAULT_MAX_LABEL_LEN: usize = 60;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Error, Debug)]
pub enum LabelRefinementError {
    #[error("Label rewriter is not configured: {0}")]
    NotConfigured(String),

    #[error("Label rewrite request failed: {0}")]
    Request(String),

    #[error("Label rewriter returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Label rewriter returned an empty label")]
    Empty,
}

/// Port for rewriting a synthesized label into something more readable.
pub trait LabelRewriter: Send + Sync {
    /// Fallible rewrite; implementations may fail freely.
    fn try_rewrite(
        &self,
        default_label: &str,
        samples: &[String],
    ) -> Result<String, LabelRefinementError>;

    /// Rewrite, falling back to `default_label` on any failure.
    fn rewrite(&self, default_label: &str, samples: &[String], max_len: usize) -> String {
        let samples = &samples[..samples.len().min(MAX_SAMPLES)];
        let outcome = self
            .try_rewrite(default_label, samples)
            .and_then(|raw| clean_label(&raw, max_len).ok_or(LabelRefinementError::Empty));

        match outcome {
            Ok(label) => {
                debug!("Refined label '{default_label}' -> '{label}'");
                label
            }
            Err(e) => {
                warn!("Keeping label '{default_label}': {e}");
                default_label.to_string()
            }
        }
    }
}

/// Trim whitespace and wrapping quotes, keep the first line, cap the length.
pub fn clean_label(raw: &str, max_len: usize) -> Option<String> {
    let first_line = raw.trim().lines().next().unwrap_or_default();
    let unquoted = first_line
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*'))
        .trim();
    if unquoted.is_empty() {
        return None;
    }
    let truncated: String = unquoted.chars().take(max_len.max(1)).collect();
    Some(truncated.trim_end().to_string())
}

/// Leaves every label as synthesized.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRewriter;

impl LabelRewriter for NoopRewriter {
    fn try_rewrite(
        &self,
        default_label: &str,
        _samples: &[String],
    ) -> Result<String, LabelRefinementError> {
        Ok(default_label.to_string())
    }
}

/// Rewriter backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiRewriter {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiRewriter {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, LabelRefinementError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LabelRefinementError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }

    /// Read the API key from the environment variable `api_key_env`.
    pub fn from_env(
        api_key_env: &str,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, LabelRefinementError> {
        let api_key = std::env::var(api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                LabelRefinementError::NotConfigured(format!("{api_key_env} is not set"))
            })?;
        Self::new(api_key, model, base_url, timeout)
    }

    fn prompt(default_label: &str, samples: &[String]) -> String {
        let mut prompt = format!(
            "These news headlines belong to one topic cluster currently labeled \"{default_label}\".\n\n"
        );
        for sample in samples {
            prompt.push_str("- ");
            prompt.push_str(sample);
            prompt.push('\n');
        }
        prompt.push_str(
            "\nReply with a concise topic label of 2 to 5 words. Reply with the label only.",
        );
        prompt
    }
}

impl LabelRewriter for OpenAiRewriter {
    fn try_rewrite(
        &self,
        default_label: &str,
        samples: &[String],
    ) -> Result<String, LabelRefinementError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| LabelRefinementError::NotConfigured("invalid API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let prompt = Self::prompt(default_label, samples);
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            max_tokens: 24,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You name topic clusters for a news map. Answer with a short label and nothing else.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|e| LabelRefinementError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LabelRefinementError::Status { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LabelRefinementError::Request(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(LabelRefinementError::Empty)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}
