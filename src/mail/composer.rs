//! RFC 2822 composition for outgoing mail.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::connectors::OutgoingMessage;

const CRLF: &str = "\r\n";

/// Header values must stay on one line.
fn header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Render `message` as an RFC 2822 document with an HTML body.
pub fn compose_rfc2822(message: &OutgoingMessage) -> String {
    let mut headers = vec![
        format!("To: {}", header_value(&message.to)),
        format!("Subject: {}", header_value(&message.subject)),
    ];
    if let Some(in_reply_to) = message.in_reply_to.as_deref().filter(|v| !v.is_empty()) {
        headers.push(format!("In-Reply-To: {}", header_value(in_reply_to)));
    }
    if let Some(references) = message.references.as_deref().filter(|v| !v.is_empty()) {
        headers.push(format!("References: {}", header_value(references)));
    }
    headers.push("MIME-Version: 1.0".to_string());
    headers.push("Content-Type: text/html; charset=utf-8".to_string());

    let mut out = headers.join(CRLF);
    out.push_str(CRLF);
    out.push_str(CRLF);
    out.push_str(&message.body);
    out
}

/// URL-safe base64 without padding, the form Gmail expects in `raw`.
pub fn encode_raw(document: &str) -> String {
    URL_SAFE_NO_PAD.encode(document.as_bytes())
}
