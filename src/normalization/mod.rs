//! Message normalization
//!
//! Turns raw provider payloads into the canonical [`NormalizedMessage`]
//! consumed by the sync reconciler. Everything here is pure: no I/O, no
//! clock, no logging.

mod aurinko;
mod gmail;
pub mod text;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::connectors::RawMessage;
use crate::models::Folder;

pub use text::{decode_base64_body, make_snippet};

/// Placeholder used when a message carries no subject.
pub const NO_SUBJECT: &str = "(No subject)";

/// Default preview length in characters.
pub const DEFAULT_SNIPPET_CHARS: usize = 100;

/// Errors that can occur while mapping provider payloads to canonical records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("payload missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("payload field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Canonical message record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub external_id: String,
    pub thread_external_id: String,
    pub from: String,
    /// Recipients flattened to one delimited string
    pub to: String,
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    pub snippet: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub folder: Folder,
}

impl NormalizedMessage {
    /// Build a record from a listing entry, for use when fetching the full
    /// message failed. The body falls back to the listing's snippet.
    pub fn from_summary(
        summary: &RawMessage,
        snippet_max_chars: usize,
    ) -> Result<Self, NormalizationError> {
        let mut record = normalize_with(summary, snippet_max_chars)?;
        if record.body.is_empty() {
            record.body = record.snippet.clone();
        }
        Ok(record)
    }
}

/// Normalize with the default snippet length.
pub fn normalize(raw: &RawMessage) -> Result<NormalizedMessage, NormalizationError> {
    normalize_with(raw, DEFAULT_SNIPPET_CHARS)
}

pub fn normalize_with(
    raw: &RawMessage,
    snippet_max_chars: usize,
) -> Result<NormalizedMessage, NormalizationError> {
    match raw {
        RawMessage::Gmail(message) => gmail::normalize_gmail(message, snippet_max_chars),
        RawMessage::Aurinko(message) => aurinko::normalize_aurinko(message, snippet_max_chars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{AurinkoMessage, GmailMessage};

    #[test]
    fn test_dispatches_per_provider() {
        let gmail = RawMessage::Gmail(GmailMessage {
            id: "g1".into(),
            thread_id: Some("gt".into()),
            label_ids: vec!["TRASH".into(), "UNREAD".into()],
            internal_date: Some("1700000000000".into()),
            ..Default::default()
        });
        let n = normalize(&gmail).unwrap();
        assert_eq!(n.folder, Folder::Trash);
        assert!(!n.is_read);
        assert_eq!(n.subject, NO_SUBJECT);

        let aurinko = RawMessage::Aurinko(AurinkoMessage {
            id: "a1".into(),
            thread_id: Some("at".into()),
            date: Some("2025-03-01T10:00:00Z".into()),
            labels: vec!["DRAFT".into()],
            ..Default::default()
        });
        assert_eq!(normalize(&aurinko).unwrap().folder, Folder::Drafts);
    }

    #[test]
    fn test_from_summary_requires_a_timestamp() {
        // Gmail listing entries carry only ids
        let reference = RawMessage::Gmail(GmailMessage {
            id: "g1".into(),
            thread_id: Some("gt".into()),
            ..Default::default()
        });
        assert_eq!(
            NormalizedMessage::from_summary(&reference, 100),
            Err(NormalizationError::MissingField {
                field: "internalDate"
            })
        );
    }

    #[test]
    fn test_from_summary_body_from_snippet() {
        let summary = RawMessage::Aurinko(AurinkoMessage {
            id: "a1".into(),
            thread_id: Some("at".into()),
            date: Some("2025-03-01T10:00:00Z".into()),
            body_snippet: Some("Short preview".into()),
            ..Default::default()
        });
        let n = NormalizedMessage::from_summary(&summary, 100).unwrap();
        assert_eq!(n.body, "Short preview");
        assert_eq!(n.snippet, "Short preview");
    }

    #[test]
    fn test_snippet_length_is_configurable() {
        let summary = RawMessage::Aurinko(AurinkoMessage {
            id: "a1".into(),
            date: Some("2025-03-01T10:00:00Z".into()),
            body: Some("abcdefghij".into()),
            ..Default::default()
        });
        assert_eq!(normalize_with(&summary, 4).unwrap().snippet, "abcd...");
    }
}
