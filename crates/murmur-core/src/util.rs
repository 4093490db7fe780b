//! Shared utility functions used across multiple modules.

use std::time::Duration;

/// Overall deadline for one REST request, response body included.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Check if a string starts with `ws://` or `wss://`.
pub fn is_ws_url(value: &str) -> bool {
    value.starts_with("ws://") || value.starts_with("wss://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Render a failed HTTP response as `"<message> (<status>)"`.
///
/// Looks for `detail`, `message` or `error` fields first, then for the first
/// field-level validation message, and finally falls back to the raw body.
pub fn parse_api_error(status: reqwest::StatusCode, body: &str) -> String {
    let code = status.as_u16();
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(body) {
        let named = ["detail", "message", "error"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(first_text));
        if let Some(message) = named.or_else(|| fields.values().find_map(first_text)) {
            return format!("{} ({code})", message.trim());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {code}")
    } else {
        format!("{trimmed} ({code})")
    }
}

fn first_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}
