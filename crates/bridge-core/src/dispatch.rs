//! Dispatcher: method branching, parameter extraction and invocation.
//!
//! | Method        | Behaviour                                              |
//! |---------------|--------------------------------------------------------|
//! | `HEAD`        | `200`, resolver never invoked                          |
//! | `GET`         | params from `?params=<json>&meta=<json>`               |
//! | `POST`        | params from the JSON body `{"params": .., "meta": ..}` |
//! | anything else | `404`, resolver never invoked                          |

use crate::codec::{self, SerializedValue, Value};
use crate::config::ProtocolConfig;
use crate::context::CallContext;
use crate::error::{CodecError, ParamsLocation, Result, RpcError};
use crate::invoker::{self, Invocation, StreamSession};
use crate::resolver::Resolver;
use crate::response::{unary, UnaryReply};
use http::{HeaderMap, Method};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// An inbound call as the dispatcher sees it.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Parsed JSON body, if any.
    pub body: Option<Json>,
    /// Raw query parameters.
    pub query: HashMap<String, String>,
}

impl RpcRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: None,
            query: HashMap::new(),
        }
    }

    /// `POST` with a JSON body.
    pub fn post(body: Json) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST)
        }
    }

    /// `GET` with query parameters.
    pub fn get<K, V, I>(query: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            query: query
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::new(Method::GET)
        }
    }
}

fn under_params_key(value: Json) -> Json {
    let mut object = JsonMap::new();
    object.insert(ProtocolConfig::PARAMS_KEY.to_string(), value);
    Json::Object(object)
}

/// Body a client sends to call a resolver with `params`.
pub fn params_body(params: &SerializedValue) -> Json {
    let mut body = under_params_key(params.json.clone());
    if let (Some(meta), Json::Object(object)) = (&params.meta, &mut body) {
        object.insert(
            ProtocolConfig::META_KEY.to_string(),
            under_params_key(meta.to_json()),
        );
    }
    body
}

/// Query pairs a client sends to call a resolver with `params`.
pub fn params_query(params: &SerializedValue) -> Vec<(&'static str, String)> {
    let mut query = vec![(ProtocolConfig::PARAMS_KEY, params.json.to_string())];
    if let Some(meta) = &params.meta {
        query.push((
            ProtocolConfig::META_KEY,
            under_params_key(meta.to_json()).to_string(),
        ));
    }
    query
}

/// What dispatch produced for the boundary to write.
pub enum Reply {
    /// `HEAD` answered without invoking the resolver.
    Warmed,
    Unary(UnaryReply),
    Stream(StreamSession),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Warmed => f.write_str("Reply::Warmed"),
            Reply::Unary(reply) => f.debug_tuple("Reply::Unary").field(reply).finish(),
            Reply::Stream(session) => f.debug_tuple("Reply::Stream").field(session).finish(),
        }
    }
}

fn parse_query_json(raw: &str) -> std::result::Result<Json, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode the call input from body or query, depending on the method.
pub fn extract_params(request: &RpcRequest) -> Result<Value> {
    if request.method == Method::POST {
        let body = request.body.as_ref().and_then(Json::as_object);
        let params = body
            .and_then(|body| body.get(ProtocolConfig::PARAMS_KEY))
            .ok_or(RpcError::ParamsMissing {
                location: ParamsLocation::Body,
            })?;
        let meta = body
            .and_then(|body| body.get(ProtocolConfig::META_KEY))
            .and_then(|meta| meta.get(ProtocolConfig::PARAMS_KEY));
        return Ok(codec::decode_with_raw_meta(params, meta)?);
    }

    let raw = request
        .query
        .get(ProtocolConfig::PARAMS_KEY)
        .ok_or(RpcError::ParamsMissing {
            location: ParamsLocation::Query,
        })?;
    let params = parse_query_json(raw)?;
    let meta = match request.query.get(ProtocolConfig::META_KEY) {
        Some(raw) => parse_query_json(raw)?
            .get(ProtocolConfig::PARAMS_KEY)
            .cloned(),
        None => None,
    };
    Ok(codec::decode_with_raw_meta(&params, meta.as_ref())?)
}

/// Run one call against `resolver`.
///
/// Unary results are awaited and encoded here; stream sessions are returned unpolled so the
/// responder controls production.
pub async fn dispatch(resolver: &Resolver, request: &RpcRequest, ctx: &CallContext) -> Result<Reply> {
    match request.method {
        Method::HEAD => Ok(Reply::Warmed),
        Method::GET | Method::POST => {
            let input = extract_params(request)?;
            debug!(parent: ctx.span(), input = ?input, "starting with input");

            let started = Instant::now();
            match invoker::invoke(resolver, input, ctx) {
                Invocation::Unary(future) => {
                    Ok(Reply::Unary(unary::resolve(future, started, ctx).await?))
                }
                Invocation::Stream(session) => Ok(Reply::Stream(session)),
            }
        }
        ref method => Err(RpcError::UnsupportedMethod {
            method: method.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn echo(calls: Arc<AtomicUsize>) -> Resolver {
        Resolver::unary("echo", move |input, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(input) }
        })
    }

    fn sample() -> Value {
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        Value::object([
            ("id", Value::from(1)),
            ("createdAt", Value::Date(created)),
            ("missing", Value::Undefined),
        ])
    }

    #[test]
    fn test_get_and_post_decode_equal_input() {
        let encoded = encode(&sample()).unwrap();
        let post = RpcRequest::post(params_body(&encoded));
        let get = RpcRequest::get(params_query(&encoded));

        assert_eq!(extract_params(&post).unwrap(), sample());
        assert_eq!(extract_params(&get).unwrap(), sample());
    }

    #[test]
    fn test_null_params_are_present() {
        let request = RpcRequest::post(json!({"params": null}));
        assert_eq!(extract_params(&request).unwrap(), Value::Null);
    }

    #[test]
    fn test_non_object_body_is_missing_params() {
        let request = RpcRequest::post(json!([1, 2]));
        assert!(matches!(
            extract_params(&request),
            Err(RpcError::ParamsMissing {
                location: ParamsLocation::Body
            })
        ));
    }

    #[test]
    fn test_invalid_query_json_is_serialization_error() {
        let request = RpcRequest::get([("params", "{not json")]);
        assert!(matches!(
            extract_params(&request),
            Err(RpcError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_params_never_invokes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = echo(calls.clone());
        let ctx = CallContext::new("echo");

        let err = dispatch(&resolver, &RpcRequest::post(json!({})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request body is missing the `params` key");

        let err = dispatch(&resolver, &RpcRequest::new(Method::GET), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request query is missing the `params` key");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_head_and_put_never_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = echo(calls.clone());
        let ctx = CallContext::new("echo");

        let reply = dispatch(&resolver, &RpcRequest::new(Method::HEAD), &ctx).await;
        assert!(matches!(reply, Ok(Reply::Warmed)));

        let reply = dispatch(&resolver, &RpcRequest::new(Method::PUT), &ctx).await;
        assert!(matches!(
            reply,
            Err(RpcError::UnsupportedMethod { ref method }) if *method == Method::PUT
        ));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unary_reply_carries_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = echo(calls.clone());
        let ctx = CallContext::new("echo");
        let request = RpcRequest::post(json!({"params": {"a": 1}}));

        match dispatch(&resolver, &request, &ctx).await.unwrap() {
            Reply::Unary(reply) => {
                assert_eq!(reply.value, Value::object([("a", 1)]));
                assert_eq!(reply.envelope.result, json!({"a": 1}));
            }
            other => panic!("expected unary reply, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
