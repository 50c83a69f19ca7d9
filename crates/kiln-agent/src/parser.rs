//! Extraction of structured data from free-form generative output
//!
//! Generative services wrap JSON and code in prose and markdown fences.
//! Nothing here panics: malformed, truncated or empty input yields `None`.

use serde::de::DeserializeOwned;

/// The outermost balanced `{...}` region of `raw`
///
/// Braces inside JSON strings (including escaped quotes) are ignored. Returns
/// `None` when the first opening brace is never closed, so a truncated
/// document never yields one of its nested objects.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in raw.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and decode a JSON object; `None` on any failure
pub fn parse<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let candidate = extract_json(raw)?;
    serde_json::from_str(candidate).ok()
}

/// Parse or fall back; the flag is `true` when parsing succeeded
pub fn parse_or<T: DeserializeOwned>(raw: &str, fallback: T) -> (T, bool) {
    match parse(raw) {
        Some(value) => (value, true),
        None => (fallback, false),
    }
}

/// Body of the first fenced code block tagged `lang`, else the first bare fence
///
/// Unfenced input is returned trimmed. An unterminated fence yields whatever
/// follows it.
pub fn extract_code(raw: &str, lang: &str) -> String {
    let tagged = format!("```{}", lang);
    let body = if let Some(pos) = find_case_insensitive(raw, &tagged) {
        Some(&raw[pos + tagged.len()..])
    } else {
        raw.find("```").map(|pos| {
            let after = &raw[pos + 3..];
            // Skip an info string such as `js` or `text` on the fence line
            match after.find('\n') {
                Some(nl) if !after[..nl].trim().contains(' ') => &after[nl + 1..],
                _ => after,
            }
        })
    };

    match body {
        Some(rest) => {
            let end = rest.find("```").unwrap_or(rest.len());
            rest[..end].trim().to_string()
        }
        None => raw.trim().to_string(),
    }
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || !needle.is_ascii() {
        return haystack.find(needle);
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
