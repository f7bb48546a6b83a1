//! Runs a resolver and tags the outcome by its declared mode.

use crate::cancel::CancellationToken;
use crate::codec::Value;
use crate::context::CallContext;
use crate::error::ResolverError;
use crate::resolver::{Handler, Resolver, UnaryFuture, ValueStream};
use futures::StreamExt;
use std::fmt;
use tracing::debug;

/// What a resolver handed back.
pub enum Invocation {
    /// The eventual single value.
    Unary(UnaryFuture),
    /// A lazy sequence, not yet polled.
    Stream(StreamSession),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Unary(_) => f.write_str("Invocation::Unary"),
            Invocation::Stream(session) => f.debug_tuple("Invocation::Stream").field(session).finish(),
        }
    }
}

/// Call the resolver with decoded input.
///
/// Nothing is awaited here: a unary future is returned unpolled and a stream producer is not
/// asked for its first value.
pub fn invoke(resolver: &Resolver, input: Value, ctx: &CallContext) -> Invocation {
    match resolver.handler() {
        Handler::Unary(call) => Invocation::Unary(call(input, ctx.clone())),
        Handler::Stream(call) => {
            let token = CancellationToken::new();
            let stream = call(input, ctx.clone(), token.clone());
            Invocation::Stream(StreamSession::new(stream, token, ctx.clone()))
        }
    }
}

/// Why a stream session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The producer ran out of values.
    Exhausted,
    /// The producer failed and an error frame was written.
    Failed,
    /// The client went away.
    Disconnected,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Exhausted => "exhausted",
            CloseReason::Failed => "failed",
            CloseReason::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream producer plus the token that cancels it.
///
/// The session is `Open` until [`StreamSession::close`] is called or it is dropped. Closing
/// happens once. Any close other than [`CloseReason::Exhausted`] abandons a live producer and
/// cancels its token, and dropping an open session counts as a disconnect.
pub struct StreamSession {
    stream: Option<ValueStream>,
    token: CancellationToken,
    ctx: CallContext,
    closed: Option<CloseReason>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("resolver", &self.ctx.resolver())
            .field("closed", &self.closed)
            .finish()
    }
}

impl StreamSession {
    fn new(stream: ValueStream, token: CancellationToken, ctx: CallContext) -> Self {
        Self {
            stream: Some(stream),
            token,
            ctx,
            closed: None,
        }
    }

    /// Ask the producer for its next value. A closed session yields `None`.
    pub async fn next(&mut self) -> Option<Result<Value, ResolverError>> {
        self.stream.as_mut()?.next().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    pub fn is_open(&self) -> bool {
        self.closed.is_none()
    }

    /// Close the session. Returns `false` if it was already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.closed.is_some() {
            return false;
        }
        self.closed = Some(reason);
        // Release the producer before running cancellation hooks.
        self.stream = None;
        if reason != CloseReason::Exhausted {
            self.token.cancel();
        }
        debug!(parent: self.ctx.span(), reason = %reason, "stream session closed");
        true
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close(CloseReason::Disconnected);
    }
}
