//! Middleware chain and the per-resolver handler.
//!
//! Interceptors run in registration order around the dispatch endpoint, which is always last.
//! Each receives the mutable [`Exchange`] and a [`Next`] continuation:
//!
//! ```
//! use async_trait::async_trait;
//! use bridge_core::middleware::{Exchange, Middleware, Next};
//!
//! struct Timing;
//!
//! #[async_trait]
//! impl Middleware for Timing {
//!     async fn handle(&self, exchange: &mut Exchange, next: Next<'_>) {
//!         let started = std::time::Instant::now();
//!         next.run(exchange).await;
//!         tracing::info!(parent: exchange.ctx.span(), elapsed = ?started.elapsed(), "done");
//!     }
//! }
//! ```

use crate::context::CallContext;
use crate::dispatch::{self, RpcRequest};
use crate::resolver::Resolver;
use crate::response::{self, PendingResponse, ResponseWriter};
use crate::warm::{self, Warmup};
use async_trait::async_trait;
use http::Method;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Everything one call carries through the chain.
#[derive(Debug)]
pub struct Exchange {
    pub request: RpcRequest,
    pub response: ResponseWriter,
    pub ctx: CallContext,
}

/// An interceptor. Not calling `next.run` short-circuits the rest of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, exchange: &mut Exchange, next: Next<'_>);
}

/// The remainder of the chain.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    resolver: &'a Resolver,
}

impl<'a> Next<'a> {
    /// Proceed to the next interceptor, or to dispatch when none is left.
    pub async fn run(self, exchange: &mut Exchange) {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    resolver: self.resolver,
                };
                head.handle(exchange, next).await;
            }
            None => endpoint(self.resolver, exchange).await,
        }
    }
}

/// The final interceptor: dispatch, then write whatever came out.
async fn endpoint(resolver: &Resolver, exchange: &mut Exchange) {
    let reply = dispatch::dispatch(resolver, &exchange.request, &exchange.ctx).await;
    response::write_reply(reply, &mut exchange.response, &exchange.ctx).await;
}

/// Ordered interceptors shared by every resolver of a server.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Serves one resolver: warm-up, middleware, dispatch, response.
#[derive(Clone)]
pub struct RpcHandler {
    resolver: Resolver,
    chain: MiddlewareChain,
    warmup: Option<Arc<dyn Warmup>>,
}

impl RpcHandler {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            chain: MiddlewareChain::new(),
            warmup: None,
        }
    }

    pub fn with_chain(mut self, chain: MiddlewareChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_warmup(mut self, warmup: Arc<dyn Warmup>) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run the call to completion on the current task.
    ///
    /// Returns the exchange so callers can inspect what the chain recorded.
    pub async fn handle(&self, request: RpcRequest, writer: ResponseWriter) -> Exchange {
        let ctx = CallContext::new(self.resolver.name());
        if request.method == Method::HEAD {
            if let Some(warmup) = &self.warmup {
                warm::trigger(warmup.clone(), &ctx);
            }
        }

        let span = ctx.span().clone();
        let mut exchange = Exchange {
            request,
            response: writer,
            ctx,
        };
        async {
            debug!(method = %exchange.request.method, "call started");
            let next = Next {
                rest: &self.chain.layers,
                resolver: &self.resolver,
            };
            next.run(&mut exchange).await;

            if !exchange.response.is_finished() {
                exchange.response.finish();
            }
        }
        .instrument(span)
        .await;
        exchange
    }

    /// Run the call on its own task and return the response as soon as it is pending.
    ///
    /// Must be called within a tokio runtime.
    pub fn serve(self: &Arc<Self>, request: RpcRequest) -> PendingResponse {
        let (writer, pending) = ResponseWriter::channel();
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.handle(request, writer).await;
        });
        pending
    }
}
