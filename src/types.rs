//! Core types: client options, chat messages and wire formats

use crate::config::{DEFAULT_MODEL, get_model};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for configuring a [`ChatClient`](crate::ChatClient)
#[derive(Clone)]
pub struct ClientOptions {
    /// Endpoint that accepts chat-completion POSTs (usually the CORS relay)
    pub proxy_url: String,

    /// Model used when a call does not name one
    pub model: String,

    /// Bearer token sent with each request. Relays hold the real credential,
    /// so this is normally unset.
    pub api_key: Option<String>,

    /// Per-attempt limit for the non-streaming path. The streaming path has
    /// no timer; it ends only on completion, error, or cancellation.
    pub request_timeout: Duration,

    /// Limit for establishing a TCP connection
    pub connect_timeout: Duration,

    /// Retry policy of the non-streaming path
    pub retry: RetryConfig,

    /// Treat a stream that ends without `[DONE]` as an error instead of a
    /// normal completion
    pub require_done_sentinel: bool,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("proxy_url", &self.proxy_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("require_done_sentinel", &self.require_done_sentinel)
            .finish()
    }
}

impl ClientOptions {
    /// Create a new builder for ClientOptions
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }
}

/// Builder for ClientOptions
#[derive(Debug, Default)]
pub struct ClientOptionsBuilder {
    proxy_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    require_done_sentinel: Option<bool>,
}

impl ClientOptionsBuilder {
    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn require_done_sentinel(mut self, require: bool) -> Self {
        self.require_done_sentinel = Some(require);
        self
    }

    pub fn build(self) -> crate::Result<ClientOptions> {
        let proxy_url = self
            .proxy_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| crate::Error::config("proxy_url is required"))?;

        if !proxy_url.starts_with("http://") && !proxy_url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "proxy_url must be an http(s) URL, got {proxy_url}"
            )));
        }

        let model = self
            .model
            .or_else(|| get_model(None, true))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let request_timeout = self.request_timeout.unwrap_or(Duration::from_secs(60));

        Ok(ClientOptions {
            proxy_url,
            model,
            api_key: self.api_key,
            request_timeout,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(10)),
            retry: self
                .retry
                .unwrap_or_else(|| RetryConfig::default().with_attempt_timeout(request_timeout)),
            require_done_sentinel: self.require_done_sentinel.unwrap_or(false),
        })
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[default]
    User,
    Assistant,
}

/// One part of a multimodal user turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image reference inside a [`ContentPart::ImageUrl`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// An image by URL; `data:` URLs carrying base64 image bytes work too
    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            ContentPart::Text { text } => text.is_empty(),
            ContentPart::ImageUrl { image_url } => image_url.url.is_empty(),
        }
    }
}

/// Message content: plain text or an ordered list of parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.iter().all(ContentPart::is_empty),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// A chat-completion message in the OpenAI-compatible wire format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatCompletionMessage {
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text.into())
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text.into())
    }

    /// A multimodal user turn
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Check a message list before it goes on the wire.
///
/// Rejects an empty list and any turn with empty content.
pub fn validate_messages(messages: &[ChatCompletionMessage]) -> crate::Result<()> {
    if messages.is_empty() {
        return Err(crate::Error::invalid_input("messages must not be empty"));
    }
    if let Some(index) = messages.iter().position(|m| m.content.is_empty()) {
        return Err(crate::Error::invalid_input(format!(
            "message {index} has empty content"
        )));
    }
    Ok(())
}

/// Chat-completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub stream: bool,
    pub messages: &'a [ChatCompletionMessage],
}

/// Non-streaming chat-completion response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatCompletionChoice>,
}

/// Choice in a non-streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChoice {
    #[serde(default)]
    pub message: Option<ChatCompletionReply>,
}

/// Assistant message in a non-streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionReply {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// `choices[0].message.content`, if present and non-empty
    pub fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
    }
}
