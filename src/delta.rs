//! Delta extraction and accumulation.
//!
//! Each decoded event payload is a JSON chunk in one of two shapes:
//!
//! ```text
//! {"choices":[{"delta":{"content":"He"}}]}        incremental token (preferred)
//! {"choices":[{"message":{"content":"Hello"}}]}   full message (fallback)
//! ```
//!
//! [`extract_delta`] reads the text fragment out of either shape. It never
//! fails: shapes it does not recognise yield an empty fragment, and
//! [`classify_payload`] tells the caller whether that emptiness deserves a
//! diagnostic.

use crate::Error;
use serde_json::Value;

/// Pull the text fragment out of one chunk payload.
///
/// Looks at `choices[0].delta.content` first, then
/// `choices[0].message.content`. Anything else (missing fields, non-string
/// content, no choices) gives `""`.
pub fn extract_delta(payload: &Value) -> &str {
    let Some(choice) = payload.get("choices").and_then(|c| c.get(0)) else {
        return "";
    };

    if let Some(delta) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
    {
        return delta;
    }

    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Decide whether a payload has a shape this client understands.
///
/// A chunk whose `choices[0]` exists but carries no text (a role-only first
/// chunk, a `finish_reason` chunk) is normal and returns `Ok`. A payload that
/// is not an object, lacks a `choices` array, or carries an `error` object is
/// reported as [`Error::FrameParse`]. Usage-only chunks with an empty
/// `choices` array are accepted.
pub fn classify_payload(payload: &Value) -> Result<(), Error> {
    if let Some(err) = payload.get("error") {
        return Err(Error::frame_parse(
            payload.to_string(),
            format!("provider reported an error: {}", err),
        ));
    }

    match payload.get("choices") {
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(Error::frame_parse(
            payload.to_string(),
            "`choices` is not an array",
        )),
        None => Err(Error::frame_parse(
            payload.to_string(),
            "payload has no `choices`",
        )),
    }
}

/// Running text of one streaming session.
///
/// Fragments are appended in arrival order; empty fragments are ignored.
/// The text only ever grows.
#[derive(Debug, Default, Clone)]
pub struct DeltaAccumulator {
    text: String,
    fragments: usize,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Returns false for an empty fragment.
    pub fn push(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        self.text.push_str(fragment);
        self.fragments += 1;
        true
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of non-empty fragments accumulated so far
    pub fn fragments(&self) -> usize {
        self.fragments
    }
}
