//! Error types for the streaming chat client

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// The first six variants are the session-level taxonomy: every failure a
/// streaming or non-streaming request can end with is one of them. The
/// remaining variants cover setup and plumbing.
#[derive(Error, Debug)]
pub enum Error {
    /// A single request attempt exceeded its allotted time
    #[error("Request timeout")]
    Timeout,

    /// Low-level transport failure (connection refused, reset, dropped body)
    #[error("Network error: {0}")]
    Network(String),

    /// Caller-initiated cancellation. `partial` holds the text accumulated
    /// before the abort took effect.
    #[error("Request aborted")]
    Aborted { partial: String },

    /// Non-2xx response from the LLM endpoint or the relay
    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A `data:` payload that could not be interpreted. Reported through the
    /// error callback, never fatal to the stream.
    #[error("Frame parse error: {reason} (payload: {payload})")]
    FrameParse { payload: String, reason: String },

    /// The non-streaming path returned no usable content
    #[error("Empty response from model")]
    EmptyResponse,

    /// HTTP client error that is neither a timeout nor a transport failure
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Streaming protocol error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Create a new upstream error
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Error::Upstream {
            status,
            body: body.into(),
        }
    }

    /// Create a new frame parse error
    pub fn frame_parse(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::FrameParse {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    /// Create an abort error carrying the partial text seen so far
    pub fn aborted(partial: impl Into<String>) -> Self {
        Error::Aborted {
            partial: partial.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// True for caller-initiated cancellation.
    ///
    /// Callers use this to suppress error UI: an abort is never a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// HTTP status carried by an upstream error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Determine if a request that failed with this error may be re-attempted.
    ///
    /// Transport failures, timeouts and the retryable status set are; caller
    /// aborts and everything else are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout | Error::Network(_) => true,
            Error::Upstream { status, .. } => crate::retry::is_retryable_status(*status),
            Error::Http(e) => e.status().is_some_and(|s| crate::retry::is_retryable_status(s.as_u16())),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Error::Network(err.to_string())
        } else {
            Error::Http(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("proxy_url is required");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: proxy_url is required"
        );
    }

    #[test]
    fn test_error_upstream() {
        let err = Error::upstream(502, "bad gateway");
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.to_string(), "Upstream error 502: bad gateway");
    }

    #[test]
    fn test_error_frame_parse() {
        let err = Error::frame_parse("{oops", "expected value");
        assert!(matches!(err, Error::FrameParse { .. }));
        assert!(err.to_string().contains("{oops"));
    }

    #[test]
    fn test_error_aborted_is_distinct() {
        let err = Error::aborted("Hel");
        assert!(err.is_abort());
        assert!(!err.is_retryable());
        assert!(!Error::timeout().is_abort());
        assert!(!Error::network("reset").is_abort());
        match err {
            Error::Aborted { partial } => assert_eq!(partial, "Hel"),
            _ => panic!("Expected Aborted"),
        }
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_empty_response() {
        assert_eq!(Error::EmptyResponse.to_string(), "Empty response from model");
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::timeout().is_retryable());
        assert!(Error::network("connection refused").is_retryable());
        assert!(Error::upstream(429, "").is_retryable());
        assert!(Error::upstream(503, "").is_retryable());
        assert!(!Error::upstream(400, "").is_retryable());
        assert!(!Error::upstream(401, "").is_retryable());
        assert!(!Error::config("x").is_retryable());
        assert!(!Error::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
