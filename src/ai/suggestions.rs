//! Reply-suggestion parsing.
//!
//! Model output is free text that usually, but not always, contains a JSON
//! array. Anything unusable collapses to [`default_suggestions`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

const MAX_SUGGESTIONS: usize = 3;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid fence regex"));
static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("valid array regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Neutral,
    Decline,
}

impl Tone {
    fn parse_lenient(raw: Option<&str>) -> Self {
        match raw {
            Some("positive") => Tone::Positive,
            Some("decline") => Tone::Decline,
            _ => Tone::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReplySuggestion {
    /// Short button label
    pub label: String,
    pub tone: Tone,
    pub body: String,
}

impl ReplySuggestion {
    fn new(label: &str, tone: Tone, body: &str) -> Self {
        Self {
            label: label.to_string(),
            tone,
            body: body.to_string(),
        }
    }
}

/// Loosely-typed model output item.
#[derive(Debug, Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

pub fn default_suggestions() -> Vec<ReplySuggestion> {
    vec![
        ReplySuggestion::new(
            "Thanks!",
            Tone::Positive,
            "Thank you for your email. I appreciate you reaching out.",
        ),
        ReplySuggestion::new(
            "Got it",
            Tone::Neutral,
            "Thanks for letting me know. I'll review this and get back to you.",
        ),
        ReplySuggestion::new(
            "Not now",
            Tone::Decline,
            "Thank you for reaching out. Unfortunately, I'm unable to proceed with this at the moment.",
        ),
    ]
}

/// Extract up to three suggestions from model output.
pub fn parse_reply_suggestions(text: &str) -> Vec<ReplySuggestion> {
    let mut candidate = text.trim();
    if let Some(inner) = FENCED_BLOCK.captures(candidate).and_then(|c| c.get(1)) {
        candidate = inner.as_str().trim();
    }
    if let Some(array) = JSON_ARRAY.find(candidate) {
        candidate = array.as_str();
    }

    let raw: Vec<RawSuggestion> = match serde_json::from_str(candidate) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Unparseable reply suggestions; using defaults");
            return default_suggestions();
        }
    };

    let suggestions: Vec<ReplySuggestion> = raw
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|s| ReplySuggestion {
            label: s
                .label
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "Reply".to_string()),
            tone: Tone::parse_lenient(s.tone.as_deref()),
            body: s.body.unwrap_or_default(),
        })
        .collect();

    if suggestions.is_empty() {
        return default_suggestions();
    }
    suggestions
}
