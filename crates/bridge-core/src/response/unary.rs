//! Unary responder: one value, one envelope.

use super::failure;
use super::writer::{CallOutcome, ResponseWriter};
use crate::codec::{self, Value};
use crate::config::ProtocolConfig;
use crate::context::CallContext;
use crate::envelope::Envelope;
use crate::error::{Result, RpcError};
use crate::resolver::UnaryFuture;
use crate::timing::CallTimings;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use std::time::Instant;
use tracing::{debug, error, info};

/// A resolved and encoded unary result.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryReply {
    pub envelope: Envelope,
    /// The value before encoding.
    pub value: Value,
    pub timings: CallTimings,
}

/// Await the resolver's value and encode it. `started` marks when the resolver was called.
pub async fn resolve(future: UnaryFuture, started: Instant, ctx: &CallContext) -> Result<UnaryReply> {
    let value = future.await?;
    let resolved = Instant::now();
    debug!(parent: ctx.span(), result = ?value, "resolver returned");

    let encoded = codec::encode(&value)?;
    let timings = CallTimings::measure(started, resolved, Instant::now());
    info!(parent: ctx.span(), "{}", timings);

    Ok(UnaryReply {
        envelope: Envelope::success(encoded),
        value,
        timings,
    })
}

/// Write the envelope as a 200 JSON body.
pub async fn respond(reply: UnaryReply, writer: &mut ResponseWriter, ctx: &CallContext) {
    let body = match reply.envelope.to_bytes() {
        Ok(body) => body,
        Err(err) => return failure::respond(&RpcError::from(err), writer, ctx).await,
    };
    writer.set_status(StatusCode::OK);
    writer.insert_header(
        CONTENT_TYPE,
        HeaderValue::from_static(ProtocolConfig::JSON_CONTENT_TYPE),
    );
    if writer.send(body).await.is_err() {
        error!(parent: ctx.span(), "Client went away before the result was delivered");
    }
    writer.set_timings(reply.timings);
    writer.set_result(reply.value);
    writer.set_outcome(CallOutcome::Success);
}
