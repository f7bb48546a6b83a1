//! The wire unit shared by unary responses and event-stream frames.
//!
//! ```json
//! { "result": <json|null>, "error": <json|null>, "meta": { "result"?: <sidecar>, "error"?: <sidecar> } }
//! ```

use crate::codec::{self, SerializedValue, SidecarMeta, Value};
use crate::config::StreamConfig;
use crate::error::CodecError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Sidecars for the envelope's result and error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SidecarMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SidecarMeta>,
}

/// One response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub result: Json,
    pub error: Json,
    #[serde(default)]
    pub meta: EnvelopeMeta,
}

impl Envelope {
    /// Envelope for a successfully produced value.
    pub fn success(result: SerializedValue) -> Self {
        Self {
            result: result.json,
            error: Json::Null,
            meta: EnvelopeMeta {
                result: result.meta,
                error: None,
            },
        }
    }

    /// Envelope for an encoded error.
    pub fn failure(error: SerializedValue) -> Self {
        Self {
            result: Json::Null,
            error: error.json,
            meta: EnvelopeMeta {
                result: None,
                error: error.meta,
            },
        }
    }

    /// Envelope for client errors that carry only a message.
    pub fn message_only(message: &str) -> Self {
        Self {
            result: Json::Null,
            error: serde_json::json!({ "message": message }),
            meta: EnvelopeMeta::default(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }

    /// Serialize as a JSON body.
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Serialize as one event-stream frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<Bytes, CodecError> {
        let json = serde_json::to_string(self)?;
        let mut frame = String::with_capacity(
            StreamConfig::FRAME_PREFIX.len() + json.len() + StreamConfig::FRAME_SUFFIX.len(),
        );
        frame.push_str(StreamConfig::FRAME_PREFIX);
        frame.push_str(&json);
        frame.push_str(StreamConfig::FRAME_SUFFIX);
        Ok(Bytes::from(frame))
    }

    /// Rebuild the result value using its sidecar.
    pub fn decode_result(&self) -> Result<Value, CodecError> {
        codec::decode(&self.result, self.meta.result.as_ref())
    }

    /// Rebuild the error value using its sidecar.
    pub fn decode_error(&self) -> Result<Value, CodecError> {
        codec::decode(&self.error, self.meta.error.as_ref())
    }
}

/// Split an event-stream body into envelopes, the way a client would.
///
/// Only `data:` lines are considered; multi-line data is joined with `\n`.
pub fn parse_event_stream(body: &str) -> Result<Vec<Envelope>, CodecError> {
    let mut envelopes = Vec::new();
    for event in body.split("\n\n") {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();
        if data.is_empty() {
            continue;
        }
        envelopes.push(serde_json::from_str(&data.join("\n"))?);
    }
    Ok(envelopes)
}
