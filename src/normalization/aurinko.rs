//! Aurinko message normalization.

use chrono::{DateTime, Utc};

use super::text::make_snippet;
use super::{NO_SUBJECT, NormalizationError, NormalizedMessage};
use crate::connectors::AurinkoMessage;
use crate::models::Folder;

pub(super) fn normalize_aurinko(
    message: &AurinkoMessage,
    snippet_max_chars: usize,
) -> Result<NormalizedMessage, NormalizationError> {
    if message.id.is_empty() {
        return Err(NormalizationError::MissingField { field: "id" });
    }

    let raw_date = message
        .date
        .as_deref()
        .ok_or(NormalizationError::MissingField { field: "date" })?;
    let sent_at = DateTime::parse_from_rfc3339(raw_date.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| NormalizationError::InvalidField {
            field: "date",
            value: raw_date.to_string(),
        })?;

    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
    let body = non_empty(&message.body)
        .or_else(|| non_empty(&message.body_snippet))
        .unwrap_or_default();
    let snippet_source = non_empty(&message.body_snippet).unwrap_or_else(|| body.clone());

    let is_read = message.is_read.unwrap_or_else(|| {
        !message
            .labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case("UNREAD"))
    });

    Ok(NormalizedMessage {
        external_id: message.id.clone(),
        thread_external_id: message
            .thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| message.id.clone()),
        from: message
            .from
            .as_ref()
            .map(|a| a.email.clone())
            .unwrap_or_default(),
        to: message
            .to
            .iter()
            .map(|a| a.email.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        subject: non_empty(&message.subject).unwrap_or_else(|| NO_SUBJECT.to_string()),
        body,
        body_html: non_empty(&message.body_html),
        snippet: make_snippet(&snippet_source, snippet_max_chars),
        sent_at,
        is_read,
        folder: Folder::from_labels(&message.labels),
    })
}
