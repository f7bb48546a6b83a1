//! Interceptors installed by the server.

use async_trait::async_trait;
use bridge_core::middleware::{Exchange, Middleware, Next};
use bridge_core::timing::pretty_duration;
use bridge_core::CallOutcome;
use std::time::Instant;
use tracing::{info, warn};

/// Logs one line per call once the response is complete.
pub struct AccessLog;

#[async_trait]
impl Middleware for AccessLog {
    async fn handle(&self, exchange: &mut Exchange, next: Next<'_>) {
        let started = Instant::now();
        next.run(exchange).await;

        let elapsed = pretty_duration(started.elapsed());
        let method = &exchange.request.method;
        let span = exchange.ctx.span();
        match exchange.response.outcome() {
            Some(CallOutcome::Success) => {
                let timings = exchange
                    .response
                    .timings()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                info!(parent: span, "{} ok in {} ({})", method, elapsed, timings);
            }
            Some(CallOutcome::Streamed { frames, reason }) => {
                info!(parent: span, "{} streamed {} frames in {}, {}", method, frames, elapsed, reason);
            }
            Some(CallOutcome::Warmed) => info!(parent: span, "{} warm in {}", method, elapsed),
            Some(CallOutcome::Failed { status, message }) => {
                warn!(parent: span, "{} failed with {} in {}: {}", method, status, elapsed, message);
            }
            None => info!(parent: span, "{} answered by middleware in {}", method, elapsed),
        }
    }
}
