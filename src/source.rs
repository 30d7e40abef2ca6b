//! Cancellable asynchronous byte sources.
//!
//! A streaming session reads its response body through the [`ByteSource`]
//! trait instead of a concrete HTTP type. Two operations are all it needs:
//! read the next chunk (or learn that the body ended) and release the reader.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;

/// A single-consumer source of body chunks.
///
/// Reads are strictly sequential; implementations are never polled
/// concurrently. `next_chunk` must be cancel-safe: the session drops an
/// in-flight read when its cancellation token fires.
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk of bytes, or `Ok(None)` once the body has ended.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Release the underlying reader. Called exactly once per session, on
    /// every exit path. Reads after release return `Ok(None)`.
    async fn release(&mut self);
}

/// Body of a `reqwest` response.
///
/// Releasing drops the response, which closes the connection if the body was
/// not fully read.
#[derive(Debug)]
pub struct ResponseSource {
    response: Option<reqwest::Response>,
}

impl ResponseSource {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response: Some(response),
        }
    }
}

#[async_trait]
impl ByteSource for ResponseSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.response.as_mut() {
            Some(response) => response.chunk().await.map_err(Error::from),
            None => Ok(None),
        }
    }

    async fn release(&mut self) {
        self.response.take();
    }
}

/// Adapter for any `Stream` of byte chunks.
///
/// Stream errors are reported as [`Error::Network`].
pub struct StreamSource<S> {
    stream: Option<S>,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// True once the source has been released
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

#[async_trait]
impl<S, B, E> ByteSource for StreamSource<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin + Send,
    B: Into<Bytes> + Send,
    E: Display + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk.into())),
            Some(Err(e)) => Err(Error::network(e.to_string())),
            None => Ok(None),
        }
    }

    async fn release(&mut self) {
        self.stream.take();
    }
}
