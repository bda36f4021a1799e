//! # AI helper
//!
//! Thin client for an OpenAI-compatible chat-completions endpoint, used to
//! summarize emails and draft short replies.

pub mod suggestions;

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::AiConfig;

pub use suggestions::{ReplySuggestion, Tone, default_suggestions, parse_reply_suggestions};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 500;

const SUMMARY_PROMPT: &str = "You are an email assistant. Summarize emails in 2-3 concise \
sentences. Focus on key points, action items, and important details. Be direct and clear.";

const REPLY_PROMPT: &str = "You are an email assistant. Generate exactly 3 short reply \
suggestions with different tones. Each reply should be 1-3 sentences max, professional and \
natural sounding.\n\nReturn ONLY a valid JSON array with exactly 3 objects. Each object must \
have:\n- \"label\": a short 2-4 word button label (e.g., \"Sounds great!\", \"Let me check\", \
\"Can't make it\")\n- \"tone\": one of \"positive\", \"neutral\", or \"decline\"\n- \"body\": \
the actual reply text (1-3 sentences)\n\nThe first should be positive/agreeable, the second \
neutral/acknowledging, the third a polite decline or deferral. Return ONLY the JSON array, \
no markdown.";

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("AI request failed ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("AI response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatContent>,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AiClient {
    http_client: Client,
    endpoint: String,
    token: Option<String>,
    model: String,
}

impl AiClient {
    pub fn new(config: &AiConfig, timeout: Duration) -> Result<Self, AiError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            model: config.model.clone(),
        })
    }

    /// Two or three sentence summary of an email.
    #[instrument(skip_all)]
    pub async fn summarize(&self, subject: &str, body: &str) -> Result<String, AiError> {
        self.chat(
            SUMMARY_PROMPT,
            format!("Summarize this email:\n\nSubject: {}\n\nBody:\n{}", subject, body),
        )
        .await
    }

    /// Three reply drafts. Never fails: any upstream problem yields the
    /// default suggestions.
    #[instrument(skip_all)]
    pub async fn reply_suggestions(&self, subject: &str, from: &str, body: &str) -> Vec<ReplySuggestion> {
        let prompt = format!(
            "Generate reply suggestions for this email:\n\nFrom: {}\nSubject: {}\n\n{}",
            from, subject, body
        );
        match self.chat(REPLY_PROMPT, prompt).await {
            Ok(text) => parse_reply_suggestions(&text),
            Err(e) => {
                warn!(error = %e, "Reply suggestion request failed; using defaults");
                default_suggestions()
            }
        }
    }

    async fn chat(&self, system: &str, user: String) -> Result<String, AiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut builder = self.http_client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Decode(e.to_string()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default())
    }
}
