//! Resolver definitions and the registry that names them.
//!
//! A resolver's mode is fixed when it is constructed: [`Resolver::unary`] produces one value,
//! [`Resolver::stream`] produces a lazy sequence. The invoker never inspects return shapes.
//!
//! # Example
//!
//! ```
//! use bridge_core::{Resolver, ResolverRegistry, Value};
//! use futures::stream;
//!
//! let mut registry = ResolverRegistry::new();
//! registry.register(Resolver::unary("ping", |_input, _ctx| async { Ok(Value::from("pong")) }));
//! registry.register(Resolver::stream("count", |_input, _ctx, _cancel| {
//!     stream::iter((1..=3).map(|i| Ok(Value::from(i))))
//! }));
//!
//! assert_eq!(registry.len(), 2);
//! ```

use crate::cancel::CancellationToken;
use crate::codec::Value;
use crate::context::CallContext;
use crate::error::ResolverError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// The immediate result of a unary resolver.
pub type UnaryFuture = BoxFuture<'static, Result<Value, ResolverError>>;

/// The lazy sequence produced by a stream resolver.
pub type ValueStream = BoxStream<'static, Result<Value, ResolverError>>;

type UnaryFn = Arc<dyn Fn(Value, CallContext) -> UnaryFuture + Send + Sync>;
type StreamFn = Arc<dyn Fn(Value, CallContext, CancellationToken) -> ValueStream + Send + Sync>;

/// Declared output mode of a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverMode {
    Unary,
    Stream,
}

#[derive(Clone)]
pub(crate) enum Handler {
    Unary(UnaryFn),
    Stream(StreamFn),
}

/// A named server-side function.
#[derive(Clone)]
pub struct Resolver {
    name: String,
    handler: Handler,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .finish()
    }
}

impl Resolver {
    /// Register a resolver answering with one value.
    pub fn unary<F, Fut>(name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(Value, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResolverError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Handler::Unary(Arc::new(move |input, ctx| resolver(input, ctx).boxed())),
        }
    }

    /// Register a resolver answering with a stream of values.
    ///
    /// The token is cancelled when the stream is abandoned before it ends, either because the
    /// client went away or because the stream failed. Producers holding timers or
    /// subscriptions release them from [`CancellationToken::on_cancel`] or by watching
    /// [`CancellationToken::cancelled`]. The stream itself is dropped when the session closes.
    pub fn stream<F, S>(name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(Value, CallContext, CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value, ResolverError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Handler::Stream(Arc::new(move |input, ctx, token| {
                resolver(input, ctx, token).boxed()
            })),
        }
    }

    /// Unary resolver with serde-typed input and output.
    pub fn typed_unary<I, O, F, Fut>(name: impl Into<String>, resolver: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ResolverError>> + Send + 'static,
    {
        let resolver = Arc::new(resolver);
        Self::unary(name, move |input: Value, ctx| {
            let resolver = resolver.clone();
            async move {
                let input: I = input.deserialize_into()?;
                let output = resolver(input, ctx).await?;
                Ok(Value::from_serialize(&output)?)
            }
        })
    }

    /// Stream resolver with serde-typed input and items.
    pub fn typed_stream<I, O, F, S>(name: impl Into<String>, resolver: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I, CallContext, CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<O, ResolverError>> + Send + 'static,
    {
        Self::stream(name, move |input: Value, ctx, token| {
            match input.deserialize_into::<I>() {
                Ok(input) => resolver(input, ctx, token)
                    .map(|item| item.and_then(|o| Ok(Value::from_serialize(&o)?)))
                    .left_stream(),
                Err(err) => futures::stream::once(async move { Err(ResolverError::from(err)) })
                    .right_stream(),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ResolverMode {
        match self.handler {
            Handler::Unary(_) => ResolverMode::Unary,
            Handler::Stream(_) => ResolverMode::Stream,
        }
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Resolvers by name.
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Resolver>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resolver, replacing any previous one with the same name.
    pub fn register(&mut self, resolver: Resolver) -> &mut Self {
        if let Some(previous) = self.resolvers.insert(resolver.name.clone(), resolver) {
            warn!("Resolver {} registered twice, keeping the latest", previous.name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Resolver> {
        self.resolvers.get(name)
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resolver> {
        self.resolvers.values()
    }
}
