//! Error handler: every failure becomes one envelope and a status.

use super::writer::{CallOutcome, ResponseWriter};
use crate::codec::{self, ErrorValue, Value};
use crate::config::ProtocolConfig;
use crate::context::CallContext;
use crate::envelope::Envelope;
use crate::error::{ResolverError, RpcError};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use tracing::error;

/// Custom field carrying the HTTP status inside an encoded error.
pub const STATUS_CODE_FIELD: &str = "statusCode";

/// A failure ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub status: StatusCode,
    pub message: String,
    /// `None` means an empty body (unsupported method).
    pub envelope: Option<Envelope>,
}

/// The thrown value behind a dispatch failure.
fn thrown(err: &RpcError) -> ResolverError {
    match err {
        RpcError::Resolver(err) => err.clone(),
        RpcError::Serialization(err) => {
            ResolverError::new(err.to_string()).with_name("SerializationError")
        }
        other => ResolverError::new(other.to_string()),
    }
}

/// Build the codec value sent for a thrown error. Stacks marked as cleared are dropped.
pub fn error_value(err: &ResolverError, status: StatusCode) -> Value {
    let mut fields = err.fields().clone();
    fields.insert(
        STATUS_CODE_FIELD.to_string(),
        Value::from(u32::from(status.as_u16())),
    );
    Value::Error(Box::new(ErrorValue {
        name: err.name().to_string(),
        message: err.message().to_string(),
        stack: err.stack().map(str::to_string),
        fields,
    }))
}

/// Encode an error envelope, falling back to a plain serialization error when the thrown
/// value itself cannot be encoded.
fn encode_error(err: &ResolverError, status: StatusCode) -> (StatusCode, Envelope) {
    match codec::encode(&error_value(err, status)) {
        Ok(encoded) => (status, Envelope::failure(encoded)),
        Err(codec_err) => {
            let fallback = ResolverError::from(codec_err);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            let envelope = codec::encode(&error_value(&fallback, status))
                .map(Envelope::failure)
                .unwrap_or_else(|_| Envelope::message_only(fallback.message()));
            (status, envelope)
        }
    }
}

/// Normalize a failure into status, message and envelope, logging it on the call span.
pub fn normalize(err: &RpcError, ctx: &CallContext) -> Failure {
    let status = err.status_code();
    let failure = match err {
        RpcError::ParamsMissing { .. } => Failure {
            status,
            message: err.to_string(),
            envelope: Some(Envelope::message_only(&err.to_string())),
        },
        RpcError::UnsupportedMethod { .. } => Failure {
            status,
            message: err.to_string(),
            envelope: None,
        },
        RpcError::Resolver(_) | RpcError::Serialization(_) => {
            let thrown = thrown(err);
            let (status, envelope) = encode_error(&thrown, status);
            Failure {
                status,
                message: thrown.message().to_string(),
                envelope: Some(envelope),
            }
        }
    };
    error!(
        parent: ctx.span(),
        status = failure.status.as_u16(),
        "{}",
        failure.message
    );
    failure
}

/// Write a failure as the whole response.
pub async fn respond(err: &RpcError, writer: &mut ResponseWriter, ctx: &CallContext) {
    let failure = normalize(err, ctx);
    writer.set_status(failure.status);
    let body = match failure.envelope.as_ref().map(Envelope::to_bytes) {
        Some(Ok(body)) => {
            writer.insert_header(
                CONTENT_TYPE,
                HeaderValue::from_static(ProtocolConfig::JSON_CONTENT_TYPE),
            );
            body
        }
        Some(Err(err)) => {
            error!(parent: ctx.span(), "Failed to serialize error envelope: {}", err);
            bytes::Bytes::new()
        }
        None => bytes::Bytes::new(),
    };
    if writer.send(body).await.is_err() {
        error!(parent: ctx.span(), "Client went away before the error was delivered");
    }
    writer.set_outcome(CallOutcome::Failed {
        status: failure.status,
        message: failure.message,
    });
}

/// Encode a failure raised mid-stream as one event-stream frame.
pub fn error_frame(err: &RpcError, ctx: &CallContext) -> Option<bytes::Bytes> {
    let failure = normalize(err, ctx);
    let envelope = failure.envelope?;
    match envelope.to_sse_frame() {
        Ok(frame) => Some(frame),
        Err(err) => {
            error!(parent: ctx.span(), "Failed to serialize error frame: {}", err);
            None
        }
    }
}
