//! Resolver bridge core.
//!
//! Exposes named server-side resolvers over HTTP. A call arrives as `GET`, `POST` or `HEAD`,
//! its params are decoded with the [`codec`], the resolver runs, and the result goes back either
//! as one JSON envelope or, for stream resolvers, as a server-sent event stream of envelopes.
//! The codec keeps types plain JSON loses (dates, maps, sets, `undefined`, `NaN`, big integers,
//! errors) intact in both directions.
//!
//! # Architecture
//!
//! - [`dispatch`]: method branching and params extraction
//! - [`invoker`]: runs a resolver, tagging the outcome unary or stream
//! - [`response`]: unary and stream responders plus the error handler
//! - [`middleware`]: interceptor chain wrapped around dispatch
//!
//! The HTTP server itself lives in the `bridge-rpc` crate; this crate is transport-neutral and
//! talks to it through [`ResponseWriter`] / [`PendingResponse`].

pub mod cancel;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod invoker;
pub mod middleware;
pub mod resolver;
pub mod response;
pub mod timing;
pub mod warm;

pub use cancel::CancellationToken;
pub use codec::Value;
pub use context::CallContext;
pub use dispatch::{Reply, RpcRequest};
pub use envelope::Envelope;
pub use error::{CodecError, ResolverError, Result, RpcError};
pub use invoker::{CloseReason, Invocation, StreamSession};
pub use middleware::{Exchange, Middleware, MiddlewareChain, Next, RpcHandler};
pub use resolver::{Resolver, ResolverMode, ResolverRegistry};
pub use response::{CallOutcome, PendingResponse, ResponseWriter};
pub use warm::{WarmOnce, Warmup};
