//! Turns upstream failure bodies into [`UpstreamError`] values.

use serde::Deserialize;

use crate::core::error::UpstreamError;

pub const MAX_RAW_BODY_CHARS: usize = 500;
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";
const TRUNCATION_MARKER: &str = "...";

#[derive(Deserialize)]
struct NestedErrorBody {
    error: NestedError,
}

#[derive(Deserialize)]
struct NestedError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct FlatErrorBody {
    #[serde(default)]
    message: String,
}

type ShapeDecoder = fn(&[u8]) -> Option<String>;

/// Candidate body shapes, highest priority first.
const ERROR_SHAPES: [ShapeDecoder; 2] = [decode_nested, decode_flat];

fn decode_nested(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<NestedErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
}

fn decode_flat(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<FlatErrorBody>(body)
        .ok()
        .map(|parsed| parsed.message)
}

/// Pure mapping from `(status, body)` to an [`UpstreamError`].
///
/// A provider may register a remediation hint for "model not supported /
/// not available" failures; it is attached as [`UpstreamError::hint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorNormalizer {
    model_unavailable_hint: Option<String>,
}

impl ErrorNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_unavailable_hint(hint: impl Into<String>) -> Self {
        Self {
            model_unavailable_hint: Some(hint.into()),
        }
    }

    pub fn normalize(&self, status_code: u16, body: &[u8]) -> UpstreamError {
        let message = extract_message(body);
        let hint = self
            .model_unavailable_hint
            .as_ref()
            .filter(|_| mentions_unavailable_model(&message))
            .cloned();

        UpstreamError {
            status_code,
            message,
            hint,
        }
    }
}

pub fn extract_message(body: &[u8]) -> String {
    if let Some(message) = ERROR_SHAPES
        .iter()
        .filter_map(|decode| decode(body))
        .find(|message| !message.trim().is_empty())
    {
        return message;
    }

    let raw = String::from_utf8_lossy(body);
    if raw.trim().is_empty() {
        return UNKNOWN_ERROR_MESSAGE.to_string();
    }

    truncate_chars(&raw, MAX_RAW_BODY_CHARS)
}

/// Requires "model" alongside the availability phrase so unrelated
/// "not supported" failures stay untouched.
pub fn mentions_unavailable_model(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("model")
        && (lower.contains("not supported") || lower.contains("not available"))
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &value[..cut]),
        None => value.to_string(),
    }
}
