//! Streaming session controller.
//!
//! A [`StreamSession`] drives one streaming request from start to finish:
//!
//! ```text
//! Idle ──► Connecting ──► Streaming ──► Completed
//!              │              ├───────► Aborted
//!              └──────────────┴───────► FailedFallback
//! ```
//!
//! While `Streaming` it reads chunks from a [`ByteSource`], feeds them to the
//! [`SseDecoder`], extracts a text fragment from every event and hands each
//! non-empty fragment to the caller as a [`Delta`].
//!
//! # Session Identity
//!
//! Every delta carries the [`SessionId`] of the session that produced it.
//! Several sessions can run at once (one per conversation, say), and a
//! late delta from an aborted session must never land in the conversation
//! that is active now. Callers compare the id on each delta with the id they
//! are currently rendering before touching shared state.
//!
//! # Cancellation
//!
//! Cancellation is cooperative and driven by a `CancellationToken`. A read in
//! progress is dropped as soon as the token fires, and the token is checked
//! again before every delta is applied, so nothing decoded after the abort
//! reaches the callbacks.
//!
//! # Reader Release
//!
//! Whatever way the `Streaming` state is left (sentinel, natural end, abort,
//! error) the source is released exactly once before `run` returns.

use crate::delta::{DeltaAccumulator, classify_payload, extract_delta};
use crate::source::ByteSource;
use crate::sse::{SseDecoder, SseEvent};
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one streaming session, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a [`StreamSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Aborted,
    FailedFallback,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::FailedFallback
        )
    }
}

/// One incremental text fragment, tagged with its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub session: SessionId,
    /// Position of this fragment among the session's non-empty fragments
    pub index: usize,
    pub text: String,
}

type DeltaFn = Box<dyn FnMut(&Delta) + Send>;
type ErrorFn = Box<dyn FnMut(SessionId, &Error) + Send>;
type DoneFn = Box<dyn FnMut(SessionId) + Send>;

/// Consumer callbacks of a streaming session.
///
/// - `on_delta`: every non-empty fragment, in order
/// - `on_error`: frame-level problems (non-fatal) and the fatal error that
///   ends a failed session; aborts are not reported here
/// - `on_done`: the session completed successfully
#[derive(Default)]
pub struct StreamCallbacks {
    on_delta: Option<DeltaFn>,
    on_error: Option<ErrorFn>,
    on_done: Option<DoneFn>,
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_delta", &self.on_delta.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delta<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Delta) + Send + 'static,
    {
        self.on_delta = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(SessionId, &Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_done<F>(mut self, f: F) -> Self
    where
        F: FnMut(SessionId) + Send + 'static,
    {
        self.on_done = Some(Box::new(f));
        self
    }

    fn delta(&mut self, delta: &Delta) {
        if let Some(f) = self.on_delta.as_mut() {
            f(delta);
        }
    }

    fn error(&mut self, session: SessionId, err: &Error) {
        if let Some(f) = self.on_error.as_mut() {
            f(session, err);
        }
    }

    fn done(&mut self, session: SessionId) {
        if let Some(f) = self.on_done.as_mut() {
            f(session);
        }
    }
}

/// Whether the event loop keeps reading
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// State of one streaming request.
///
/// A session is single-use: once it reaches a terminal state, further calls
/// to [`StreamSession::run`] fail with [`Error::InvalidInput`].
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    state: SessionState,
    decoder: SseDecoder,
    accumulator: DeltaAccumulator,
    require_done_sentinel: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self::with_id(SessionId::next())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            decoder: SseDecoder::new(),
            accumulator: DeltaAccumulator::new(),
            require_done_sentinel: false,
        }
    }

    /// When set, a body that ends without `[DONE]` fails the session.
    pub fn require_done_sentinel(mut self, require: bool) -> Self {
        self.require_done_sentinel = require;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        self.accumulator.text()
    }

    /// `Idle → Connecting`: the request is about to go out.
    pub fn begin_connect(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Connecting;
        }
    }

    /// End the session before `Streaming` was reached.
    ///
    /// Used for a non-2xx response, a transport error or an abort while
    /// connecting. Returns the error for propagation.
    pub fn fail_connect(&mut self, err: Error, callbacks: &mut StreamCallbacks) -> Error {
        self.settle_err(err, callbacks)
    }

    /// Consume `source` until the stream completes, fails, or is cancelled.
    ///
    /// Returns the full accumulated text on success. On abort the error is
    /// [`Error::Aborted`] carrying the partial text.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        callbacks: &mut StreamCallbacks,
    ) -> Result<String>
    where
        S: ByteSource + ?Sized,
    {
        if self.state.is_terminal() || self.state == SessionState::Streaming {
            return Err(Error::invalid_input(format!(
                "{} cannot run from state {:?}",
                self.id, self.state
            )));
        }

        self.state = SessionState::Streaming;
        log::debug!("{} streaming", self.id);

        let outcome = self.pump(source, cancel, callbacks).await;
        source.release().await;

        match outcome {
            Ok(()) => {
                self.state = SessionState::Completed;
                log::debug!(
                    "{} completed with {} fragments",
                    self.id,
                    self.accumulator.fragments()
                );
                callbacks.done(self.id);
                Ok(self.accumulator.text().to_string())
            }
            Err(err) => Err(self.settle_err(err, callbacks)),
        }
    }

    fn settle_err(&mut self, err: Error, callbacks: &mut StreamCallbacks) -> Error {
        if err.is_abort() {
            self.state = SessionState::Aborted;
            log::debug!("{} aborted", self.id);
            // Attach the text seen before the abort.
            Error::aborted(self.accumulator.text())
        } else {
            self.state = SessionState::FailedFallback;
            log::debug!("{} failed: {}", self.id, err);
            callbacks.error(self.id, &err);
            err
        }
    }

    async fn pump<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        callbacks: &mut StreamCallbacks,
    ) -> Result<()>
    where
        S: ByteSource + ?Sized,
    {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::aborted("")),
                chunk = source.next_chunk() => chunk?,
            };

            match chunk {
                Some(bytes) => {
                    self.decoder.push(&bytes);
                    while let Some(event) = self.decoder.next_event() {
                        if cancel.is_cancelled() {
                            return Err(Error::aborted(""));
                        }
                        if self.handle_event(event, callbacks) == Flow::Done {
                            return Ok(());
                        }
                    }
                }
                None => {
                    if let Some(event) = self.decoder.finish() {
                        if cancel.is_cancelled() {
                            return Err(Error::aborted(""));
                        }
                        if self.handle_event(event, callbacks) == Flow::Done {
                            return Ok(());
                        }
                    }
                    if self.require_done_sentinel {
                        return Err(Error::stream("stream ended without [DONE]"));
                    }
                    log::debug!("{} body ended without [DONE]", self.id);
                    return Ok(());
                }
            }
        }
    }

    fn handle_event(&mut self, event: SseEvent, callbacks: &mut StreamCallbacks) -> Flow {
        if event.is_done() {
            return Flow::Done;
        }

        let data = event.data();
        let payload: serde_json::Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                let err = Error::frame_parse(data, e.to_string());
                log::warn!("{} skipping frame: {}", self.id, err);
                callbacks.error(self.id, &err);
                return Flow::Continue;
            }
        };

        if let Err(err) = classify_payload(&payload) {
            log::warn!("{} unrecognised frame: {}", self.id, err);
            callbacks.error(self.id, &err);
        }

        let fragment = extract_delta(&payload);
        if self.accumulator.push(fragment) {
            let delta = Delta {
                session: self.id,
                index: self.accumulator.fragments() - 1,
                text: fragment.to_string(),
            };
            callbacks.delta(&delta);
        }

        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamSource;
    use std::sync::{Arc, Mutex};

    fn source_of(chunks: &[&str]) -> StreamSource<impl futures::Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Unpin + Send> {
        let owned: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        StreamSource::new(futures::stream::iter(owned))
    }

    fn recording_callbacks() -> (StreamCallbacks, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let d = deltas.clone();
        let e = errors.clone();
        let callbacks = StreamCallbacks::new()
            .on_delta(move |delta| d.lock().unwrap().push(delta.text.clone()))
            .on_error(move |_, err| e.lock().unwrap().push(err.to_string()));
        (callbacks, deltas, errors)
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("session-"));
    }

    #[test]
    fn test_new_session_is_idle() {
        let mut session = StreamSession::new();
        assert_eq!(session.state(), SessionState::Idle);
        session.begin_connect();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_run_collects_deltas_until_done() {
        let mut source = source_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\ndata: [DONE]\n\n",
        ]);
        let (mut callbacks, deltas, errors) = recording_callbacks();
        let mut session = StreamSession::new();

        let text = session
            .run(&mut source, &CancellationToken::new(), &mut callbacks)
            .await
            .unwrap();

        assert_eq!(text, "Hello");
        assert_eq!(*deltas.lock().unwrap(), vec!["He", "llo"]);
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Completed);
        assert!(source.is_released());
    }

    #[tokio::test]
    async fn test_connect_failure_marks_failed() {
        let (mut callbacks, _, errors) = recording_callbacks();
        let mut session = StreamSession::new();
        session.begin_connect();

        let err = session.fail_connect(Error::upstream(500, "boom"), &mut callbacks);

        assert_eq!(err.status(), Some(500));
        assert_eq!(session.state(), SessionState::FailedFallback);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_is_single_use() {
        let mut session = StreamSession::new();
        let mut callbacks = StreamCallbacks::new();
        let cancel = CancellationToken::new();

        session
            .run(&mut source_of(&["data: [DONE]\n\n"]), &cancel, &mut callbacks)
            .await
            .unwrap();

        let again = session
            .run(&mut source_of(&["data: [DONE]\n\n"]), &cancel, &mut callbacks)
            .await;
        assert!(matches!(again, Err(Error::InvalidInput(_))));
    }
}
