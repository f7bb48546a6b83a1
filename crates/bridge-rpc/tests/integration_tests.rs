//! Integration tests for the bridge-rpc HTTP server.
//!
//! These tests spawn the binary, read its `RPC_PORT=` line, and drive the demo resolvers
//! over real HTTP.

use bridge_core::codec::{self, Value};
use bridge_core::dispatch::{params_body, params_query};
use bridge_core::envelope::{parse_event_stream, Envelope};
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<serde_json::Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    fn url(&self, resolver: &str) -> String {
        format!("http://127.0.0.1:{}/api/{}", self.port, resolver)
    }

    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the RPC binary and wait until `/health` is ready.
async fn start_rpc_server() -> Result<RpcServerHandle, String> {
    let binary = if let Ok(path) = std::env::var("CARGO_BIN_EXE_bridge-rpc") {
        PathBuf::from(path)
    } else {
        let current_exe = std::env::current_exe()
            .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
        let target_debug_dir = current_exe
            .parent()
            .and_then(|p| p.parent())
            .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

        let mut fallback = target_debug_dir.join("bridge-rpc");
        if cfg!(target_os = "windows") {
            fallback.set_extension("exe");
        }
        if !fallback.exists() {
            return Err(format!(
                "CARGO_BIN_EXE_bridge-rpc not set and fallback binary not found at {}",
                fallback.display()
            ));
        }
        fallback
    };

    let mut child = tokio::process::Command::new(&binary)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--tick-ms")
        .arg("20")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn bridge-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read bridge-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by bridge-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("bridge-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

async fn post(server: &RpcServerHandle, resolver: &str, params: &Value) -> reqwest::Response {
    let encoded = codec::encode(params).unwrap();
    reqwest::Client::new()
        .post(server.url(resolver))
        .json(&params_body(&encoded))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_get_project_returns_exact_date() {
    let server = start_rpc_server().await.unwrap();

    let response = post(&server, "getProject", &Value::object([("id", 1)])).await;
    assert_eq!(response.status(), 200);
    let envelope: Envelope = response.json().await.unwrap();
    let project = envelope.decode_result().unwrap();

    let expected = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(project.get("createdAt"), Some(&Value::Date(expected)));
    assert_eq!(project.get("id"), Some(&Value::from(1)));

    server.stop().await;
}

#[tokio::test]
async fn test_get_project_by_query_string() {
    let server = start_rpc_server().await.unwrap();

    let encoded = codec::encode(&Value::object([("id", 2)])).unwrap();
    let response = reqwest::Client::new()
        .get(server.url("getProject"))
        .query(&params_query(&encoded))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let envelope: Envelope = response.json().await.unwrap();
    assert_eq!(envelope.result["name"], "Codec Playground");

    server.stop().await;
}

#[tokio::test]
async fn test_forbidden_project_is_403() {
    let server = start_rpc_server().await.unwrap();

    let response = post(&server, "getProject", &Value::object([("id", -1)])).await;
    assert_eq!(response.status(), 403);
    let envelope: Envelope = response.json().await.unwrap();
    assert!(envelope.result.is_null());
    assert_eq!(envelope.error["message"], "forbidden");
    assert!(envelope.error.get("stack").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_project_is_404_envelope() {
    let server = start_rpc_server().await.unwrap();

    let response = post(&server, "getProject", &Value::object([("id", 42)])).await;
    assert_eq!(response.status(), 404);
    let envelope: Envelope = response.json().await.unwrap();
    assert_eq!(envelope.error["name"], "NotFoundError");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_params_is_400() {
    let server = start_rpc_server().await.unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("getProject"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Request body is missing the `params` key");

    let response = client.get(server.url("getProject")).send().await.unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Request query is missing the `params` key");

    server.stop().await;
}

#[tokio::test]
async fn test_head_and_put() {
    let server = start_rpc_server().await.unwrap();
    let client = reqwest::Client::new();

    let response = client.head(server.url("getProject")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let response = client.put(server.url("getProject")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert!(response.bytes().await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_resolver_is_404() {
    let server = start_rpc_server().await.unwrap();

    let response = post(&server, "doesNotExist", &Value::Null).await;
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_echo_round_trips_rich_values() {
    let server = start_rpc_server().await.unwrap();

    let date = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
    let value = Value::object([
        ("nan", Value::Number(f64::NAN)),
        ("nothing", Value::Undefined),
        ("big", Value::BigInt(1 << 80)),
        ("tags", Value::Set(vec![Value::from("a"), Value::from("b")])),
        ("byDate", Value::Map(vec![(Value::Date(date), Value::from(true))])),
    ]);
    let response = post(&server, "echo", &value).await;
    let envelope: Envelope = response.json().await.unwrap();
    assert_eq!(envelope.decode_result().unwrap(), value);

    server.stop().await;
}

#[tokio::test]
async fn test_server_time_streams_frames() {
    let server = start_rpc_server().await.unwrap();

    let params = Value::object([("count", 3), ("intervalMs", 10)]);
    let response = post(&server, "getServerTime", &params).await;
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream;charset=utf-8");
    assert_eq!(headers["cache-control"], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");

    let body = response.text().await.unwrap();
    let frames = parse_event_stream(&body).unwrap();
    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert!(frame.decode_result().unwrap().as_date().is_some());
    }

    server.stop().await;
}

#[tokio::test]
async fn test_client_can_leave_an_endless_stream() {
    let server = start_rpc_server().await.unwrap();

    let response = post(&server, "getServerTime", &Value::Null).await;
    let mut chunks = response.bytes_stream();
    let mut received = String::new();
    while received.matches("\n\n").count() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("frame in time")
            .expect("stream still open")
            .unwrap();
        received.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    drop(chunks);
    assert!(parse_event_stream(&received).unwrap().len() >= 2);

    // The server keeps serving after the disconnect.
    assert!(check_health(server.port).await);

    server.stop().await;
}
