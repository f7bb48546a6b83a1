//! Protocol tests: full calls through `RpcHandler` with an in-memory transport.
//!
//! Each test builds a handler, serves a request, and reads the response exactly as an HTTP
//! adapter would.

use bridge_core::codec::{self, ErrorValue, Value};
use bridge_core::dispatch::{params_body, params_query};
use bridge_core::envelope::parse_event_stream;
use bridge_core::{
    CancellationToken, Envelope, PendingResponse, Resolver, ResolverError, RpcHandler, RpcRequest,
};
use chrono::{TimeZone, Utc};
use futures::stream;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Response {
    status: StatusCode,
    headers: http::HeaderMap,
    body: bytes::Bytes,
}

async fn read(pending: PendingResponse) -> Response {
    let (head, body) = tokio::time::timeout(Duration::from_secs(5), pending.into_parts())
        .await
        .expect("response head in time")
        .expect("response committed");
    let body = tokio::time::timeout(Duration::from_secs(5), body.read_to_end())
        .await
        .expect("response body in time");
    Response {
        status: head.status,
        headers: head.headers,
        body,
    }
}

fn envelope(response: &Response) -> Envelope {
    serde_json::from_slice(&response.body).expect("body is an envelope")
}

fn counted_echo(calls: Arc<AtomicUsize>) -> Arc<RpcHandler> {
    Arc::new(RpcHandler::new(Resolver::unary("echo", move |input, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(input) }
    })))
}

fn rich_value() -> Value {
    let date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let mut error = ErrorValue::new("boom");
    error.fields.insert("code".into(), Value::from("E_BOOM"));
    Value::object([
        ("date", Value::Date(date)),
        ("nothing", Value::Undefined),
        ("nan", Value::Number(f64::NAN)),
        ("negZero", Value::Number(-0.0)),
        ("big", Value::BigInt(9_007_199_254_740_993)),
        (
            "map",
            Value::Map(vec![
                (Value::from(1), Value::Date(date)),
                (Value::from("k"), Value::Set(vec![Value::from(1), Value::from(2)])),
            ]),
        ),
        ("error", Value::Error(Box::new(error))),
    ])
}

#[tokio::test]
async fn test_round_trip_through_unary_call() {
    let handler = counted_echo(Arc::new(AtomicUsize::new(0)));
    let encoded = codec::encode(&rich_value()).unwrap();

    let response = read(handler.serve(RpcRequest::post(params_body(&encoded)))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(envelope(&response).decode_result().unwrap(), rich_value());
}

#[tokio::test]
async fn test_get_and_post_decode_equal_input() {
    let handler = counted_echo(Arc::new(AtomicUsize::new(0)));
    let encoded = codec::encode(&rich_value()).unwrap();

    let post = read(handler.serve(RpcRequest::post(params_body(&encoded)))).await;
    let get = read(handler.serve(RpcRequest::get(params_query(&encoded)))).await;

    let from_post = envelope(&post).decode_result().unwrap();
    let from_get = envelope(&get).decode_result().unwrap();
    assert_eq!(from_post, from_get);
    assert_eq!(from_get, rich_value());
}

#[tokio::test]
async fn test_post_without_params_is_400_body() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = counted_echo(calls.clone());

    let response = read(handler.serve(RpcRequest::post(json!({"other": 1})))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let envelope = envelope(&response);
    assert!(envelope.result.is_null());
    assert!(envelope.error["message"].as_str().unwrap().contains("body"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_get_without_params_is_400_query() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = counted_echo(calls.clone());

    let response = read(handler.serve(RpcRequest::new(Method::GET))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = envelope(&response).error["message"].clone();
    assert_eq!(message, "Request query is missing the `params` key");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_head_is_200_without_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = counted_echo(calls.clone());

    let response = read(handler.serve(RpcRequest::new(Method::HEAD))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_put_is_404_without_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = counted_echo(calls.clone());

    let response = read(handler.serve(RpcRequest::new(Method::PUT))).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_of_three_is_three_frames() {
    let handler = Arc::new(RpcHandler::new(Resolver::stream("letters", |_, _, _| {
        stream::iter(["A", "B", "C"].map(|s| Ok(Value::from(s))))
    })));

    let response = read(handler.serve(RpcRequest::post(json!({"params": null})))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers[http::header::CONTENT_TYPE],
        "text/event-stream;charset=utf-8"
    );

    let text = std::str::from_utf8(&response.body).unwrap();
    assert_eq!(text.matches("data: ").count(), 3);
    let frames = parse_event_stream(text).unwrap();
    let values: Vec<Value> = frames
        .iter()
        .map(|frame| {
            assert!(frame.error.is_null());
            frame.decode_result().unwrap()
        })
        .collect();
    assert_eq!(values, vec![Value::from("A"), Value::from("B"), Value::from("C")]);
}

#[tokio::test]
async fn test_disconnect_after_second_frame() {
    let hooks = Arc::new(AtomicUsize::new(0));
    let produced = Arc::new(AtomicUsize::new(0));
    let (hook_count, produced_count) = (hooks.clone(), produced.clone());
    let handler = Arc::new(RpcHandler::new(Resolver::stream(
        "letters",
        move |_, _, token: CancellationToken| {
            let hooks = hook_count.clone();
            token.on_cancel(move || {
                hooks.fetch_add(1, Ordering::SeqCst);
            });
            let produced = produced_count.clone();
            stream::unfold(0usize, move |i| {
                let produced = produced.clone();
                async move {
                    if i == 2 {
                        // The third value takes long enough for the client to leave first.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    if i == 3 {
                        return None;
                    }
                    produced.fetch_add(1, Ordering::SeqCst);
                    Some((Ok(Value::from(["A", "B", "C"][i])), i + 1))
                }
            })
        },
    )));

    let pending = handler.serve(RpcRequest::post(json!({"params": null})));
    let (_head, mut body) = pending.into_parts().await.unwrap();
    let mut received = String::new();
    for _ in 0..2 {
        let chunk = body.chunk().await.unwrap();
        received.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    drop(body);

    // Cancellation runs on the handler's task; poll until it lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while hooks.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(produced.load(Ordering::SeqCst), 2);
    assert_eq!(parse_event_stream(&received).unwrap().len(), 2);
}

#[tokio::test]
async fn test_thrown_status_becomes_http_status() {
    let handler = Arc::new(RpcHandler::new(Resolver::unary("secret", |_, _| async {
        Err(ResolverError::new("forbidden").with_status(403))
    })));

    let response = read(handler.serve(RpcRequest::post(json!({"params": {}})))).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    let envelope = envelope(&response);
    assert!(envelope.result.is_null());
    assert_eq!(envelope.error["message"], "forbidden");

    let decoded = envelope.decode_error().unwrap();
    assert_eq!(decoded.get("statusCode"), Some(&Value::from(403)));
}

#[tokio::test]
async fn test_date_in_result_survives() {
    let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let handler = Arc::new(RpcHandler::new(Resolver::unary(
        "getProject",
        move |_, _| async move {
            Ok(Value::object([
                ("id", Value::from(1)),
                ("createdAt", Value::Date(created)),
            ]))
        },
    )));

    let response = read(handler.serve(RpcRequest::post(json!({"params": {"id": 1}})))).await;
    let result = envelope(&response).decode_result().unwrap();
    assert_eq!(result.get("createdAt"), Some(&Value::Date(created)));
}

#[tokio::test]
async fn test_unsupported_result_is_500_serialization_error() {
    let handler = Arc::new(RpcHandler::new(Resolver::unary("far", |_, _| async {
        Ok(Value::Date(chrono::DateTime::<Utc>::MAX_UTC))
    })));

    let response = read(handler.serve(RpcRequest::post(json!({"params": null})))).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let decoded = envelope(&response).decode_error().unwrap();
    assert_eq!(decoded.as_error().unwrap().name, "SerializationError");
}

#[tokio::test]
async fn test_invalid_sidecar_is_500() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = counted_echo(calls.clone());

    let body = json!({"params": 1, "meta": {"params": {"values": ["Bogus"]}}});
    let response = read(handler.serve(RpcRequest::post(body))).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(envelope(&response).is_error());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[derive(Debug, Deserialize)]
struct Countdown {
    from: u32,
}

#[derive(Debug, Serialize)]
struct Tick {
    remaining: u32,
}

fn countdown_handler() -> Arc<RpcHandler> {
    Arc::new(RpcHandler::new(Resolver::typed_stream(
        "countdown",
        |input: Countdown, _, _| {
            stream::iter(
                (0..input.from)
                    .rev()
                    .map(|remaining| Ok::<_, ResolverError>(Tick { remaining })),
            )
        },
    )))
}

#[tokio::test]
async fn test_typed_stream_serializes_items() {
    let request = RpcRequest::post(json!({"params": {"from": 3}}));
    let response = read(countdown_handler().serve(request)).await;
    assert_eq!(response.status, StatusCode::OK);

    let frames = parse_event_stream(std::str::from_utf8(&response.body).unwrap()).unwrap();
    let values: Vec<Value> = frames.iter().map(|f| f.decode_result().unwrap()).collect();
    assert_eq!(
        values,
        vec![
            Value::object([("remaining", 2)]),
            Value::object([("remaining", 1)]),
            Value::object([("remaining", 0)]),
        ]
    );
}

#[tokio::test]
async fn test_typed_stream_bad_input_is_one_error_frame() {
    let request = RpcRequest::post(json!({"params": "soon"}));
    let response = read(countdown_handler().serve(request)).await;
    assert_eq!(response.status, StatusCode::OK);

    let frames = parse_event_stream(std::str::from_utf8(&response.body).unwrap()).unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].result.is_null());
    assert_eq!(frames[0].error["name"], "SerializationError");
}
