//! Per-call context.
//!
//! Every component of a call receives the same [`CallContext`]. Its span is the logging
//! capability: components log through it instead of reaching for a shared logger, so each line
//! carries the resolver name and request id.

use http::Extensions;
use tracing::Span;
use uuid::Uuid;

/// Context value for one resolver invocation.
#[derive(Debug, Clone)]
pub struct CallContext {
    resolver: String,
    request_id: Uuid,
    span: Span,
    extensions: Extensions,
}

impl CallContext {
    pub fn new(resolver: impl Into<String>) -> Self {
        let resolver = resolver.into();
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("rpc", resolver = %resolver, request_id = %request_id);
        Self {
            resolver,
            request_id,
            span,
            extensions: Extensions::new(),
        }
    }

    pub fn resolver(&self) -> &str {
        &self.resolver
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Span every log line of this call is recorded under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Typed values contributed by middleware (sessions, tenants, ...).
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Shorthand for `extensions().get::<T>()`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}
