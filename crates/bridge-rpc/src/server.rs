//! HTTP server implementation using Axum.

use crate::handler::{handle_call, handle_health};
use axum::{
    routing::{any, get},
    Router,
};
use bridge_core::warm::Warmup;
use bridge_core::{MiddlewareChain, ResolverRegistry, RpcHandler};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// One handler per resolver name
    pub handlers: HashMap<String, Arc<RpcHandler>>,
}

/// Everything the server needs to answer calls.
pub struct ServerConfig {
    pub registry: ResolverRegistry,
    pub chain: MiddlewareChain,
    pub warmup: Option<Arc<dyn Warmup>>,
    /// Route prefix, e.g. `/api`
    pub base_path: String,
}

impl AppState {
    fn new(config: &ServerConfig) -> Self {
        let handlers = config
            .registry
            .iter()
            .map(|resolver| {
                let mut handler = RpcHandler::new(resolver.clone()).with_chain(config.chain.clone());
                if let Some(warmup) = &config.warmup {
                    handler = handler.with_warmup(warmup.clone());
                }
                (resolver.name().to_string(), Arc::new(handler))
            })
            .collect();
        Self { handlers }
    }
}

/// Route pattern for resolver calls under `base_path`.
fn call_route(base_path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() || base.starts_with('/') {
        format!("{}/:name", base)
    } else {
        format!("/{}/:name", base)
    }
}

/// Build the router.
pub fn router(config: &ServerConfig) -> Router {
    let state = Arc::new(AppState::new(config));

    // Event streams are read cross-origin by browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(&call_route(&config.base_path), any(handle_call))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(config: ServerConfig, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(&config);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(
        "Server listening on {} ({} resolvers under {})",
        actual_addr,
        config.registry.len(),
        call_route(&config.base_path)
    );

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::{registry, ProjectStore};
    use std::time::Duration;

    fn test_config() -> ServerConfig {
        ServerConfig {
            registry: registry(Arc::new(ProjectStore::new()), Duration::from_millis(10)),
            chain: MiddlewareChain::new(),
            warmup: None,
            base_path: "/api".to_string(),
        }
    }

    #[test]
    fn test_call_route() {
        assert_eq!(call_route("/api"), "/api/:name");
        assert_eq!(call_route("/api/"), "/api/:name");
        assert_eq!(call_route("rpc"), "/rpc/:name");
        assert_eq!(call_route(""), "/:name");
    }

    #[test]
    fn test_state_has_handler_per_resolver() {
        let config = test_config();
        let state = AppState::new(&config);
        assert!(state.handlers.contains_key("getProject"));
        assert!(state.handlers.contains_key("getServerTime"));
    }

    #[tokio::test]
    async fn test_server_starts() {
        let addr = start_server(test_config(), "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
