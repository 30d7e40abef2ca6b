//! Chat client: streaming replies, non-streaming completion and fallback
//!
//! [`ChatClient`] is the entry point applications use. It owns one reusable
//! `reqwest::Client` and offers three ways to get a reply:
//!
//! - [`stream_reply`](ChatClient::stream_reply): POST with `stream: true` and
//!   drive a [`StreamSession`] over the response body, handing each delta to
//!   the caller's callbacks as it arrives.
//! - [`complete`](ChatClient::complete): POST with `stream: false` through the
//!   [`RequestExecutor`] (per-attempt timeout, bounded retry) and return
//!   `choices[0].message.content`.
//! - [`reply_with_fallback`](ChatClient::reply_with_fallback): stream, and if
//!   the stream fails for any reason other than an abort, re-issue the same
//!   messages on the non-streaming path.
//!
//! ## Request Flow
//!
//! ```text
//! stream_reply(messages)
//!     │
//!     ├─> validate messages            (InvalidInput, no network call)
//!     │
//!     ├─> Idle → Connecting            POST {model, stream: true, messages}
//!     │
//!     ├─> non-2xx                      → FailedFallback, Upstream{status, body}
//!     │
//!     ├─> Connecting → Streaming       bytes → SseDecoder → extract_delta
//!     │
//!     └─> [DONE] / body end            → Completed, full text
//! ```
//!
//! ## Streaming Without Callbacks
//!
//! [`spawn_stream`](ChatClient::spawn_stream) runs a session on a Tokio task
//! and exposes its deltas as a [`DeltaStream`], with a [`StreamHandle`] to
//! abort it or wait for the final text:
//!
//! ```rust,no_run
//! # use streamchat::{ChatClient, ChatCompletionMessage, ClientOptions};
//! # use futures::StreamExt;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ChatClient::new(
//!     ClientOptions::builder()
//!         .proxy_url("http://localhost:8787")
//!         .build()?,
//! )?;
//!
//! let (handle, mut deltas) = client.spawn_stream(vec![ChatCompletionMessage::user("Hi")], None);
//! while let Some(delta) = deltas.next().await {
//!     print!("{}", delta?.text);
//! }
//! let full_text = handle.finish().await?;
//! # Ok(())
//! # }
//! ```

use crate::retry::RequestExecutor;
use crate::session::{Delta, SessionId, StreamCallbacks, StreamSession};
use crate::source::ResponseSource;
use crate::types::{
    ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse, ClientOptions,
    validate_messages,
};
use crate::{Error, Result};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Stream of deltas produced by [`ChatClient::spawn_stream`].
///
/// `Err` items are the problems reported while streaming (skipped frames and
/// the fatal error, if any); the authoritative outcome comes from
/// [`StreamHandle::finish`].
pub type DeltaStream = Pin<Box<dyn futures::Stream<Item = Result<Delta>> + Send>>;

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct ChatClient {
    options: ClientOptions,
    http_client: reqwest::Client,
    executor: RequestExecutor,
}

impl ChatClient {
    /// Creates a new client with the specified configuration.
    ///
    /// The underlying `reqwest::Client` only has a connect timeout. A streamed
    /// reply may legitimately run for minutes, so the streaming path relies on
    /// cancellation instead of a total timer; the non-streaming path gets its
    /// per-attempt limit from [`ClientOptions::retry`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let executor = RequestExecutor::new(http_client.clone(), options.retry.clone());

        Ok(Self {
            options,
            http_client,
            executor,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn chat_request(
        &self,
        client: &reqwest::Client,
        body: &ChatCompletionRequest<'_>,
    ) -> reqwest::RequestBuilder {
        let mut request = client
            .post(&self.options.proxy_url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.options.api_key {
            request = request.bearer_auth(key);
        }
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }
        request
    }

    /// Streams a reply, delivering deltas to `callbacks` as they arrive.
    ///
    /// The request is a single attempt with no total timeout. It ends when the
    /// `[DONE]` sentinel arrives, the body ends, a fatal error occurs, or
    /// `cancel` fires.
    ///
    /// # Returns
    ///
    /// The full accumulated text (possibly empty) once the session completes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `messages` is empty or has an empty turn
    /// - [`Error::Upstream`] for a non-2xx response, with its body text
    /// - [`Error::Network`] / [`Error::Timeout`] for transport failures
    /// - [`Error::Aborted`] with the partial text if `cancel` fired
    ///
    /// Every error except an abort is also reported through `on_error`.
    pub async fn stream_reply(
        &self,
        messages: &[ChatCompletionMessage],
        model: Option<&str>,
        cancel: &CancellationToken,
        mut callbacks: StreamCallbacks,
    ) -> Result<String> {
        let session = StreamSession::new();
        self.run_session(session, messages, model, cancel, &mut callbacks)
            .await
    }

    async fn run_session(
        &self,
        mut session: StreamSession,
        messages: &[ChatCompletionMessage],
        model: Option<&str>,
        cancel: &CancellationToken,
        callbacks: &mut StreamCallbacks,
    ) -> Result<String> {
        validate_messages(messages)?;

        let body = ChatCompletionRequest {
            model: model.unwrap_or(&self.options.model),
            stream: true,
            messages,
        };

        session = session.require_done_sentinel(self.options.require_done_sentinel);
        session.begin_connect();
        log::debug!(
            "{} POST {} (model {}, {} messages)",
            session.id(),
            self.options.proxy_url,
            body.model,
            messages.len()
        );

        let send = self.chat_request(&self.http_client, &body).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(session.fail_connect(Error::aborted(""), callbacks));
            }
            result = send => match result {
                Ok(response) => response,
                Err(e) => return Err(session.fail_connect(Error::from(e), callbacks)),
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(session.fail_connect(Error::upstream(status.as_u16(), body), callbacks));
        }

        let mut source = ResponseSource::new(response);
        session.run(&mut source, cancel, callbacks).await
    }

    /// Requests a complete reply in one non-streaming call.
    ///
    /// Goes through the [`RequestExecutor`], so transient failures (timeouts,
    /// connection errors, 408/425/429/5xx) are retried with exponential
    /// backoff. Reading the body is bounded by `request_timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Upstream`] for a non-2xx final response
    /// - [`Error::EmptyResponse`] if `choices[0].message.content` is missing
    ///   or empty
    /// - [`Error::Json`] if the body is not a chat-completion response
    pub async fn complete(
        &self,
        messages: &[ChatCompletionMessage],
        model: Option<&str>,
    ) -> Result<String> {
        self.complete_with_cancel(messages, model, &CancellationToken::new())
            .await
    }

    /// [`complete`](Self::complete) with a cancellation token.
    pub async fn complete_with_cancel(
        &self,
        messages: &[ChatCompletionMessage],
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_messages(messages)?;

        let body = ChatCompletionRequest {
            model: model.unwrap_or(&self.options.model),
            stream: false,
            messages,
        };

        log::debug!("POST {} (non-streaming, model {})", self.options.proxy_url, body.model);
        let response = self
            .executor
            .execute(cancel, |client| self.chat_request(client, &body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(Error::upstream(status.as_u16(), body));
        }

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::aborted("")),
            read = tokio::time::timeout(self.options.request_timeout, response.bytes()) => {
                read.map_err(|_| Error::Timeout)??
            }
        };

        let parsed: ChatCompletionResponse = serde_json::from_slice(&raw)?;
        parsed.into_content().ok_or(Error::EmptyResponse)
    }

    /// Streams a reply and falls back to [`complete`](Self::complete) when
    /// streaming fails.
    ///
    /// An abort is returned as is and never triggers the fallback. Any other
    /// streaming failure is logged as a warning, after which the identical
    /// message list is sent on the non-streaming path. Its result replaces
    /// whatever partial text the stream produced.
    pub async fn reply_with_fallback(
        &self,
        messages: &[ChatCompletionMessage],
        model: Option<&str>,
        cancel: &CancellationToken,
        callbacks: StreamCallbacks,
    ) -> Result<String> {
        match self.stream_reply(messages, model, cancel, callbacks).await {
            Ok(text) => Ok(text),
            Err(err) if err.is_abort() => Err(err),
            Err(err @ Error::InvalidInput(_)) => Err(err),
            Err(err) => {
                log::warn!("streaming failed, falling back to non-streaming: {}", err);
                self.complete_with_cancel(messages, model, cancel).await
            }
        }
    }

    /// Runs a streaming session on a background task.
    ///
    /// Returns a [`StreamHandle`] to abort the session or await its final text,
    /// and a [`DeltaStream`] yielding its deltas in order. Dropping the stream
    /// does not stop the session; call [`StreamHandle::abort`] for that.
    pub fn spawn_stream(
        &self,
        messages: Vec<ChatCompletionMessage>,
        model: Option<String>,
    ) -> (StreamHandle, DeltaStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();

        let mut callbacks = StreamCallbacks::new()
            .on_delta(move |delta| {
                // The receiver may be gone; the session still runs to its end.
                let _ = tx.send(Ok(delta.clone()));
            })
            .on_error(move |_, err| {
                let _ = error_tx.send(Err(detached_error(err)));
            });

        let session = StreamSession::new();
        let id = session.id();
        let cancel = CancellationToken::new();
        let client = self.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            client
                .run_session(session, &messages, model.as_deref(), &task_cancel, &mut callbacks)
                .await
        });

        let handle = StreamHandle { id, cancel, join };
        (handle, Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Handle to a session started by [`ChatClient::spawn_stream`]
#[derive(Debug)]
pub struct StreamHandle {
    id: SessionId,
    cancel: CancellationToken,
    join: JoinHandle<Result<String>>,
}

impl StreamHandle {
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Stop the session. Deltas not yet delivered are discarded.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// A token that aborts this session when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session to end and return its text.
    pub async fn finish(self) -> Result<String> {
        self.join
            .await
            .map_err(|e| Error::other(format!("stream task failed: {}", e)))?
    }
}

/// Owned copy of a borrowed error for the delta channel
fn detached_error(err: &Error) -> Error {
    match err {
        Error::FrameParse { payload, reason } => Error::frame_parse(payload.clone(), reason.clone()),
        Error::Upstream { status, body } => Error::upstream(*status, body.clone()),
        Error::Network(msg) => Error::network(msg.clone()),
        Error::Timeout => Error::Timeout,
        Error::EmptyResponse => Error::EmptyResponse,
        other => Error::stream(other.to_string()),
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_else(|e| {
        log::warn!("Failed to read error response body: {}", e);
        "Unknown error (failed to read response body)".to_string()
    })
}
