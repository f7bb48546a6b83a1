//! HTTP handlers bridging axum requests to resolver calls.

use crate::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bridge_core::RpcRequest;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, warn};

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Parse a JSON body. An empty or unparsable body counts as absent.
fn parse_body(body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring request body that is not JSON: {}", e);
            None
        }
    }
}

/// Resolver call handler for every method on `<base>/:name`.
pub async fn handle_call(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(handler) = state.handlers.get(&name) else {
        warn!("Unknown resolver: {}", name);
        return StatusCode::NOT_FOUND.into_response();
    };

    let request = RpcRequest {
        method,
        headers,
        body: parse_body(&body),
        query,
    };

    let pending = handler.serve(request);
    let Some((head, body)) = pending.into_parts().await else {
        error!("Resolver {} ended without a response", name);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = Response::new(Body::from_stream(body.map(Ok::<_, Infallible>)));
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;
    response
}
