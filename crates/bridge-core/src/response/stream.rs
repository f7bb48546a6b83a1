//! Stream responder: drives a stream session into event-stream frames.
//!
//! Each produced value becomes one `data: <envelope>\n\n` frame. A slot in the body channel is
//! reserved before the producer is asked for its next value, so at most one frame is in flight
//! and a slow client throttles the producer. Waiting on the producer races the client going
//! away; a disconnect closes the session, which cancels the producer's token exactly once.

use super::failure;
use super::writer::{CallOutcome, ResponseWriter};
use crate::codec;
use crate::config::StreamConfig;
use crate::context::CallContext;
use crate::envelope::Envelope;
use crate::error::RpcError;
use crate::invoker::{CloseReason, StreamSession};
use http::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE,
};
use http::StatusCode;
use tracing::{debug, info};

/// Frames written and why the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: usize,
    pub reason: CloseReason,
}

fn set_stream_headers(writer: &mut ResponseWriter) {
    writer.set_status(StatusCode::OK);
    writer.insert_header(
        CONTENT_TYPE,
        HeaderValue::from_static(StreamConfig::CONTENT_TYPE),
    );
    writer.insert_header(
        CACHE_CONTROL,
        HeaderValue::from_static(StreamConfig::CACHE_CONTROL),
    );
    writer.insert_header(
        ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(StreamConfig::ALLOW_ORIGIN),
    );
    writer.insert_header(
        HeaderName::from_static(StreamConfig::BUFFERING_HEADER),
        HeaderValue::from_static(StreamConfig::BUFFERING_DISABLED),
    );
}

enum Step {
    Frame(bytes::Bytes),
    Fail(bytes::Bytes),
    End(CloseReason),
}

async fn pump(session: &mut StreamSession, writer: &ResponseWriter, ctx: &CallContext) -> StreamSummary {
    let mut frames = 0;
    let Some(sender) = writer.body_sender() else {
        return StreamSummary {
            frames,
            reason: CloseReason::Disconnected,
        };
    };

    loop {
        // Previous frame must be taken by the transport before the next value is produced.
        let Ok(permit) = sender.reserve().await else {
            return StreamSummary {
                frames,
                reason: CloseReason::Disconnected,
            };
        };

        let next = tokio::select! {
            biased;
            _ = sender.closed() => None,
            item = session.next() => Some(item),
        };

        let step = match next {
            None => Step::End(CloseReason::Disconnected),
            Some(None) => Step::End(CloseReason::Exhausted),
            Some(Some(Ok(value))) => {
                debug!(parent: ctx.span(), frame = frames, value = ?value, "stream value");
                let frame = codec::encode(&value)
                    .map(Envelope::success)
                    .and_then(|envelope| envelope.to_sse_frame());
                match frame {
                    Ok(frame) => Step::Frame(frame),
                    Err(err) => match failure::error_frame(&RpcError::from(err), ctx) {
                        Some(frame) => Step::Fail(frame),
                        None => Step::End(CloseReason::Failed),
                    },
                }
            }
            Some(Some(Err(err))) => match failure::error_frame(&RpcError::from(err), ctx) {
                Some(frame) => Step::Fail(frame),
                None => Step::End(CloseReason::Failed),
            },
        };

        match step {
            Step::Frame(frame) => {
                if sender.is_closed() {
                    return StreamSummary {
                        frames,
                        reason: CloseReason::Disconnected,
                    };
                }
                permit.send(frame);
                frames += 1;
            }
            Step::Fail(frame) => {
                if sender.is_closed() {
                    return StreamSummary {
                        frames,
                        reason: CloseReason::Disconnected,
                    };
                }
                permit.send(frame);
                return StreamSummary {
                    frames,
                    reason: CloseReason::Failed,
                };
            }
            Step::End(reason) => return StreamSummary { frames, reason },
        }
    }
}

/// Stream the session to the writer until exhaustion, failure or disconnect.
pub async fn respond(
    mut session: StreamSession,
    writer: &mut ResponseWriter,
    ctx: &CallContext,
) -> StreamSummary {
    set_stream_headers(writer);
    let summary = match writer.commit() {
        Ok(()) => pump(&mut session, writer, ctx).await,
        Err(_) => StreamSummary {
            frames: 0,
            reason: CloseReason::Disconnected,
        },
    };
    session.close(summary.reason);
    writer.finish();

    info!(
        parent: ctx.span(),
        frames = summary.frames,
        reason = %summary.reason,
        "stream closed"
    );
    writer.set_outcome(CallOutcome::Streamed {
        frames: summary.frames,
        reason: summary.reason,
    });
    summary
}
