//! # streamchat
//!
//! A streaming chat-completion client for OpenAI-compatible LLM endpoints.
//!
//! ## Overview
//!
//! The crate turns an HTTP response carrying Server-Sent Events into a clean,
//! ordered stream of text fragments, and wraps that in the controls a chat UI
//! needs:
//!
//! - **Incremental SSE decoding**: frames split across arbitrary chunk
//!   boundaries (including inside multi-byte UTF-8 characters) decode the same
//!   as if they had arrived whole
//! - **Delta extraction**: `choices[0].delta.content`, or
//!   `choices[0].message.content` for servers that send whole messages
//! - **Stop generating**: cooperative cancellation through a
//!   `CancellationToken`; the partial text survives the abort
//! - **Session identity**: every delta carries the [`SessionId`] of the
//!   request that produced it, so late fragments from an aborted request can
//!   be told apart from the current one
//! - **Fallback**: a failed stream can be re-issued on the non-streaming path,
//!   which retries transient failures with exponential backoff
//! - **CORS relay**: a small axum service that holds the provider credential
//!   and forwards browser requests
//!
//! ## Streaming a Reply
//!
//! ```rust,no_run
//! use streamchat::{ChatClient, ChatCompletionMessage, ClientOptions, StreamCallbacks};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::new(
//!         ClientOptions::builder()
//!             .proxy_url("http://localhost:8787")
//!             .model("qwen-vl-plus")
//!             .build()?,
//!     )?;
//!
//!     let callbacks = StreamCallbacks::new()
//!         .on_delta(|delta| print!("{}", delta.text))
//!         .on_error(|session, err| eprintln!("{session}: {err}"));
//!
//!     let messages = vec![ChatCompletionMessage::user("What's the capital of France?")];
//!     let text = client
//!         .stream_reply(&messages, None, &CancellationToken::new(), callbacks)
//!         .await?;
//!     println!("\n{} characters", text.chars().count());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **sse**: incremental decoder from bytes to `data:` events
//! - **delta**: text extraction from event payloads and accumulation
//! - **source**: the `ByteSource` seam between sessions and HTTP bodies
//! - **session**: the per-request state machine, cancellation and callbacks
//! - **retry**: per-attempt timeout and bounded exponential backoff
//! - **client**: streaming, non-streaming and fallback entry points
//! - **types**: client options and the chat-completion wire format
//! - **config**: environment lookups and provider endpoints
//! - **history**: stored conversation to chat-completion messages
//! - **api**: client for the conversation/message REST backend
//! - **relay**: the CORS relay service
//! - **error**: the crate-wide `Error` and `Result`

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Conversation and message REST client with attachment uploads.
mod api;

/// `ChatClient`: streaming replies, non-streaming completion and fallback.
mod client;

/// Environment helpers and provider endpoints.
mod config;

/// Text extraction from chat-completion payloads.
mod delta;

/// Error types and the crate-wide `Result` alias.
mod error;

/// Mapping of stored conversations onto chat-completion messages.
mod history;

/// Stream session state machine.
mod session;

/// Byte sources feeding a session.
mod source;

/// Incremental Server-Sent Events decoder.
mod sse;

/// Client options and wire types.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and the resilient request
/// executor. Public so applications can reuse the policy for their own calls.
pub mod retry;

/// CORS relay service (axum).
pub mod relay;

// --- Client API ---

pub use client::{ChatClient, DeltaStream, StreamHandle};

// --- Streaming Core ---

pub use delta::{DeltaAccumulator, classify_payload, extract_delta};
pub use session::{Delta, SessionId, SessionState, StreamCallbacks, StreamSession};
pub use source::{ByteSource, ResponseSource, StreamSource};
pub use sse::{DONE_SENTINEL, SseDecoder, SseEvent};

// --- Configuration ---

pub use config::{DEFAULT_MODEL, DEFAULT_PROXY_URL, Provider, get_model, get_proxy_url};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Conversation Backend ---

pub use api::{Attachment, ChatMessage, Conversation, ConversationApi, SendMessage, UploadFile};
pub use history::{DEFAULT_EXCERPT_CHARS, build_llm_messages, truncate_with_notice};

// --- Core Types ---

pub use types::{
    ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse, ClientOptions,
    ClientOptionsBuilder, ContentPart, ImageUrl, MessageContent, MessageRole, validate_messages,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types.
/// Import with `use streamchat::prelude::*;`.
pub mod prelude {
    pub use crate::{
        ChatClient, ChatCompletionMessage, ClientOptions, ContentPart, Delta, Error, Result,
        SessionId, StreamCallbacks, StreamHandle,
    };
    pub use tokio_util::sync::CancellationToken;
}
