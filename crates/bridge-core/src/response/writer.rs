//! Transport-neutral response writer.
//!
//! A [`ResponseWriter`] and its [`PendingResponse`] are the two ends of one HTTP response. The
//! writer commits the head once, then pushes body chunks through a channel sized by
//! [`StreamConfig::BODY_CHANNEL_CAPACITY`]. The transport owns the pending end; dropping its
//! body stream is how a client disconnect becomes visible to the writer.

use crate::codec::Value;
use crate::config::StreamConfig;
use crate::invoker::CloseReason;
use crate::timing::CallTimings;
use bytes::Bytes;
use futures::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// The client stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Status line and headers of a committed response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// How the call ended, recorded for middleware that runs after `next`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// HEAD warm request answered.
    Warmed,
    /// Unary value written.
    Success,
    /// Event stream finished after `frames` frames.
    Streamed { frames: usize, reason: CloseReason },
    /// Error envelope (or empty 404) written.
    Failed { status: StatusCode, message: String },
}

/// Writing end of a response.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::Sender<Bytes>>,
    outcome: Option<CallOutcome>,
    result: Option<Value>,
    timings: Option<CallTimings>,
}

impl ResponseWriter {
    /// Create a connected writer and pending response.
    pub fn channel() -> (ResponseWriter, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(StreamConfig::BODY_CHANNEL_CAPACITY);
        let writer = ResponseWriter {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx: Some(body_tx),
            outcome: None,
            result: None,
            timings: None,
        };
        (writer, PendingResponse { head_rx, body_rx })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status. Ignored once the head is committed.
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.is_committed() {
            self.status = status;
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers still to be sent. Changes after commit are not transmitted.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.body_tx.is_none()
    }

    /// Send the status line and headers.
    pub fn commit(&mut self) -> Result<(), ClientGone> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };
        let head = ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        };
        head_tx.send(head).map_err(|_| ClientGone)
    }

    /// Write one body chunk, committing the head first if needed.
    ///
    /// Waits while the previous chunk is still buffered.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), ClientGone> {
        self.commit()?;
        let body_tx = self.body_tx.as_ref().ok_or(ClientGone)?;
        body_tx.send(chunk).await.map_err(|_| ClientGone)
    }

    /// Commit, write a complete body and finish.
    pub async fn send(&mut self, body: Bytes) -> Result<(), ClientGone> {
        let written = if body.is_empty() {
            self.commit()
        } else {
            self.write(body).await
        };
        self.finish();
        written
    }

    /// End the body. Commits an empty response if nothing was written.
    pub fn finish(&mut self) {
        let _ = self.commit();
        self.body_tx = None;
    }

    /// Resolve once the client has stopped reading.
    pub async fn closed(&self) {
        if let Some(body_tx) = &self.body_tx {
            body_tx.closed().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.body_tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    pub(crate) fn body_sender(&self) -> Option<&mpsc::Sender<Bytes>> {
        self.body_tx.as_ref()
    }

    pub fn outcome(&self) -> Option<&CallOutcome> {
        self.outcome.as_ref()
    }

    pub fn set_outcome(&mut self, outcome: CallOutcome) {
        self.outcome = Some(outcome);
    }

    /// The decoded value a unary resolver answered with.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    pub fn timings(&self) -> Option<&CallTimings> {
        self.timings.as_ref()
    }

    pub(crate) fn set_timings(&mut self, timings: CallTimings) {
        self.timings = Some(timings);
    }
}

/// Reading end of a response, held by the transport.
#[derive(Debug)]
pub struct PendingResponse {
    head_rx: oneshot::Receiver<ResponseHead>,
    body_rx: mpsc::Receiver<Bytes>,
}

impl PendingResponse {
    /// Wait for the head. `None` if the writer was dropped without committing.
    pub async fn into_parts(self) -> Option<(ResponseHead, ResponseBody)> {
        let head = self.head_rx.await.ok()?;
        Some((
            head,
            ResponseBody {
                body_rx: self.body_rx,
            },
        ))
    }
}

/// Body chunks as they are written. Dropping it signals a disconnect.
#[derive(Debug)]
pub struct ResponseBody {
    body_rx: mpsc::Receiver<Bytes>,
}

impl ResponseBody {
    /// Next chunk, `None` once the writer finished.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.body_rx.recv().await
    }

    /// Read the remaining body into one buffer.
    pub async fn read_to_end(mut self) -> Bytes {
        let mut buf = Vec::new();
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk);
        }
        Bytes::from(buf)
    }
}

impl Stream for ResponseBody {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.body_rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_commits_and_finishes() {
        let (mut writer, pending) = ResponseWriter::channel();
        writer.set_status(StatusCode::CREATED);
        let task = tokio::spawn(async move {
            writer.send(Bytes::from_static(b"hello")).await.unwrap();
            writer
        });
        let (head, body) = pending.into_parts().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(&body.read_to_end().await[..], b"hello");
        let writer = task.await.unwrap();
        assert!(writer.is_committed());
        assert!(writer.is_finished());
    }

    #[tokio::test]
    async fn test_status_is_frozen_after_commit() {
        let (mut writer, _pending) = ResponseWriter::channel();
        writer.commit().unwrap();
        writer.set_status(StatusCode::NOT_FOUND);
        assert_eq!(writer.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_finish_without_body_is_empty_200() {
        let (mut writer, pending) = ResponseWriter::channel();
        writer.finish();
        let (head, body) = pending.into_parts().await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert!(body.read_to_end().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_body_is_visible_to_writer() {
        let (mut writer, pending) = ResponseWriter::channel();
        writer.commit().unwrap();
        let (_head, body) = pending.into_parts().await.unwrap();
        assert!(!writer.is_closed());
        drop(body);
        writer.closed().await;
        assert!(writer.is_closed());
        assert_eq!(writer.write(Bytes::from_static(b"x")).await, Err(ClientGone));
    }

    #[tokio::test]
    async fn test_dropped_writer_yields_no_head() {
        let (writer, pending) = ResponseWriter::channel();
        drop(writer);
        assert!(pending.into_parts().await.is_none());
    }
}
