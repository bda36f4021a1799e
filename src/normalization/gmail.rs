//! Gmail message normalization.

use chrono::{TimeZone, Utc};

use super::text::{decode_base64_body, decode_html_entities, make_snippet};
use super::{NO_SUBJECT, NormalizationError, NormalizedMessage};
use crate::connectors::{GmailMessage, GmailPayload};
use crate::models::Folder;

pub(super) fn normalize_gmail(
    message: &GmailMessage,
    snippet_max_chars: usize,
) -> Result<NormalizedMessage, NormalizationError> {
    if message.id.is_empty() {
        return Err(NormalizationError::MissingField { field: "id" });
    }

    let raw_date = message
        .internal_date
        .as_deref()
        .ok_or(NormalizationError::MissingField {
            field: "internalDate",
        })?;
    let sent_at = raw_date
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| NormalizationError::InvalidField {
            field: "internalDate",
            value: raw_date.to_string(),
        })?;

    let empty = GmailPayload::default();
    let payload = message.payload.as_ref().unwrap_or(&empty);

    let provider_snippet = message
        .snippet
        .as_deref()
        .map(decode_html_entities)
        .filter(|s| !s.trim().is_empty());

    let body = find_part(payload, "text/plain")
        .or_else(|| top_level_body(payload))
        .or_else(|| provider_snippet.clone())
        .unwrap_or_default();
    let body_html = find_part(payload, "text/html");

    let snippet = match &provider_snippet {
        Some(s) => make_snippet(s, snippet_max_chars),
        None => make_snippet(&body, snippet_max_chars),
    };

    let subject = header(payload, "Subject")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let is_unread = message
        .label_ids
        .iter()
        .any(|l| l.eq_ignore_ascii_case("UNREAD"));

    Ok(NormalizedMessage {
        external_id: message.id.clone(),
        thread_external_id: message
            .thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| message.id.clone()),
        from: header(payload, "From").unwrap_or_default(),
        to: header(payload, "To").unwrap_or_default(),
        subject,
        body,
        body_html,
        snippet,
        sent_at,
        is_read: !is_unread,
        folder: Folder::from_labels(&message.label_ids),
    })
}

fn header(payload: &GmailPayload, name: &str) -> Option<String> {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn is_mime(part: &GmailPayload, mime: &str) -> bool {
    part.mime_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with(mime))
}

fn part_data(part: &GmailPayload) -> Option<String> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .and_then(decode_base64_body)
}

/// Depth-first search for the first decodable part of the given MIME type.
fn find_part(payload: &GmailPayload, mime: &str) -> Option<String> {
    if is_mime(payload, mime)
        && let Some(text) = part_data(payload)
    {
        return Some(text);
    }
    payload.parts.iter().find_map(|part| find_part(part, mime))
}

/// Body data attached directly to a non-HTML top-level payload.
fn top_level_body(payload: &GmailPayload) -> Option<String> {
    if is_mime(payload, "text/html") {
        return None;
    }
    part_data(payload).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{GmailBody, GmailHeader};
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn encoded(text: &str) -> Option<GmailBody> {
        Some(GmailBody {
            data: Some(URL_SAFE_NO_PAD.encode(text)),
            size: Some(text.len() as u64),
        })
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<GmailHeader> {
        pairs
            .iter()
            .map(|(n, v)| GmailHeader {
                name: n.to_string(),
                value: v.to_string(),
            })
            .collect()
    }

    fn multipart_message() -> GmailMessage {
        GmailMessage {
            id: "m1".into(),
            thread_id: Some("t1".into()),
            label_ids: vec!["INBOX".into(), "UNREAD".into()],
            snippet: Some("Quarterly numbers &amp; plan".into()),
            internal_date: Some("1700000000000".into()),
            payload: Some(GmailPayload {
                mime_type: Some("multipart/mixed".into()),
                headers: headers(&[
                    ("from", "Ann <ann@example.com>"),
                    ("TO", "bob@example.com"),
                    ("Subject", "Q3"),
                ]),
                body: None,
                parts: vec![
                    GmailPayload {
                        mime_type: Some("multipart/alternative".into()),
                        parts: vec![
                            GmailPayload {
                                mime_type: Some("text/plain; charset=UTF-8".into()),
                                body: encoded("Plain body"),
                                ..Default::default()
                            },
                            GmailPayload {
                                mime_type: Some("text/html".into()),
                                body: encoded("<p>Html body</p>"),
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    },
                    GmailPayload {
                        mime_type: Some("application/pdf".into()),
                        ..Default::default()
                    },
                ],
            }),
        }
    }

    #[test]
    fn test_nested_multipart() {
        let n = normalize_gmail(&multipart_message(), 100).unwrap();

        assert_eq!(n.external_id, "m1");
        assert_eq!(n.thread_external_id, "t1");
        assert_eq!(n.from, "Ann <ann@example.com>");
        assert_eq!(n.to, "bob@example.com");
        assert_eq!(n.subject, "Q3");
        assert_eq!(n.body, "Plain body");
        assert_eq!(n.body_html.as_deref(), Some("<p>Html body</p>"));
        assert_eq!(n.snippet, "Quarterly numbers & plan");
        assert_eq!(n.sent_at.timestamp_millis(), 1_700_000_000_000);
        assert!(!n.is_read);
        assert_eq!(n.folder, Folder::Inbox);
    }

    #[test]
    fn test_top_level_body_and_missing_subject() {
        let message = GmailMessage {
            id: "m2".into(),
            thread_id: Some("t2".into()),
            label_ids: vec!["SENT".into()],
            internal_date: Some("1700000000000".into()),
            payload: Some(GmailPayload {
                mime_type: Some("text/plain".into()),
                body: encoded("Just text"),
                ..Default::default()
            }),
            ..Default::default()
        };

        let n = normalize_gmail(&message, 100).unwrap();
        assert_eq!(n.subject, NO_SUBJECT);
        assert_eq!(n.body, "Just text");
        assert_eq!(n.body_html, None);
        assert_eq!(n.snippet, "Just text");
        assert!(n.is_read);
        assert_eq!(n.folder, Folder::Sent);
    }

    #[test]
    fn test_html_only_falls_back_to_snippet_for_body() {
        let message = GmailMessage {
            id: "m3".into(),
            thread_id: Some("t3".into()),
            snippet: Some("Preview text".into()),
            internal_date: Some("1700000000000".into()),
            payload: Some(GmailPayload {
                mime_type: Some("text/html".into()),
                body: encoded("<div>Only html</div>"),
                ..Default::default()
            }),
            ..Default::default()
        };

        let n = normalize_gmail(&message, 100).unwrap();
        assert_eq!(n.body, "Preview text");
        assert_eq!(n.body_html.as_deref(), Some("<div>Only html</div>"));
    }

    #[test]
    fn test_missing_internal_date_is_error() {
        let mut message = multipart_message();
        message.internal_date = None;
        assert_eq!(
            normalize_gmail(&message, 100),
            Err(NormalizationError::MissingField {
                field: "internalDate"
            })
        );

        message.internal_date = Some("yesterday".into());
        assert!(matches!(
            normalize_gmail(&message, 100),
            Err(NormalizationError::InvalidField { field: "internalDate", .. })
        ));
    }

    #[test]
    fn test_missing_thread_id_uses_message_id() {
        let mut message = multipart_message();
        message.thread_id = None;
        assert_eq!(normalize_gmail(&message, 100).unwrap().thread_external_id, "m1");
    }
}
