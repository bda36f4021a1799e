//! Text helpers shared by the provider normalizers.

use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use regex::Regex;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("compile html tag regex"));

static BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("compile block regex")
});

/// Decode a transport-encoded body part.
///
/// Gmail sends URL-safe base64, but padding varies between messages, so
/// each engine is tried in turn.
pub fn decode_base64_body(data: &str) -> Option<String> {
    let engines: [&base64::engine::GeneralPurpose; 4] =
        [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    let trimmed = data.trim();
    engines.iter().find_map(|engine| {
        engine
            .decode(trimmed)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Remove markup, keeping text content.
pub fn strip_tags(s: &str) -> String {
    let without_blocks = BLOCK_PATTERN.replace_all(s, " ");
    TAG_PATTERN.replace_all(&without_blocks, " ").into_owned()
}

/// Build a preview line: tags stripped, entities decoded, whitespace
/// collapsed, at most `max_chars` characters plus `...` when cut.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let plain = decode_html_entities(&strip_tags(text));
    let collapsed = plain.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let cut: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_body_variants() {
        // "Hello, World!" unpadded url-safe, padded standard
        assert_eq!(
            decode_base64_body("SGVsbG8sIFdvcmxkIQ").as_deref(),
            Some("Hello, World!")
        );
        assert_eq!(
            decode_base64_body("SGVsbG8sIFdvcmxkIQ==").as_deref(),
            Some("Hello, World!")
        );
        // "??>" encodes with url-safe characters
        assert_eq!(decode_base64_body("Pz8-").as_deref(), Some("??>"));
        assert_eq!(decode_base64_body("Pz8+").as_deref(), Some("??>"));
        assert_eq!(decode_base64_body("%%%"), None);
    }

    #[test]
    fn test_make_snippet_strips_markup() {
        assert_eq!(
            make_snippet("<p>Hello&nbsp;<b>there</b></p>\n\n<style>p{}</style>friend", 100),
            "Hello there friend"
        );
        assert_eq!(make_snippet("Tom &amp; Jerry", 100), "Tom & Jerry");
    }

    #[test]
    fn test_make_snippet_truncates_on_char_boundary() {
        let text = "é".repeat(150);
        let snippet = make_snippet(&text, 100);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 103);

        assert_eq!(make_snippet("short", 100), "short");
        assert_eq!(make_snippet("", 100), "");
    }

    #[test]
    fn test_make_snippet_exact_length_not_marked() {
        let text = "a".repeat(100);
        assert_eq!(make_snippet(&text, 100), text);
    }
}
