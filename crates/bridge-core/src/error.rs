//! Error types for the resolver bridge.
//!
//! Three layers of failure exist:
//!
//! - [`CodecError`]: a value or a sidecar could not be serialized or reconstructed.
//! - [`ResolverError`]: the value a resolver "throws". It carries an optional HTTP status,
//!   an error name, custom fields and an optional stack, all of which travel through the codec.
//! - [`RpcError`]: the dispatch taxonomy returned by the terminal interceptor. The boundary maps
//!   each kind to an HTTP status with [`RpcError::status_code`].

use crate::codec::Value;
use http::{Method, StatusCode};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Where the dispatcher expected to find the call's `params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsLocation {
    /// `POST` requests carry params in the JSON body.
    Body,
    /// `GET` requests carry params in the query string.
    Query,
}

impl ParamsLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamsLocation::Body => "body",
            ParamsLocation::Query => "query",
        }
    }
}

impl fmt::Display for ParamsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown type annotation `{annotation}` at path {path:?}")]
    UnknownAnnotation { path: String, annotation: String },

    #[error("Annotation `{annotation}` does not fit the value at path {path:?}: {message}")]
    Malformed {
        path: String,
        annotation: String,
        message: String,
    },

    #[error("Annotation path {0:?} does not address a value")]
    DanglingPath(String),

    #[error("Unsupported value: {0}")]
    Unsupported(String),

    #[error("Invalid JSON: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Custom(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl serde::ser::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CodecError::Custom(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CodecError::Custom(msg.to_string())
    }
}

/// A failure raised by resolver logic.
///
/// Resolvers may set a status (e.g. 403) which becomes the HTTP status of the response;
/// without one the call fails with 500. Custom fields are codec values, so a `Date` or a
/// `Map` attached to an error reaches the client intact.
///
/// ```
/// use bridge_core::ResolverError;
///
/// let err = ResolverError::new("forbidden")
///     .with_status(403)
///     .with_field("reason", "not a member")
///     .clear_stack();
/// assert_eq!(err.status_code(), Some(403));
/// assert!(err.stack().is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverError {
    name: String,
    message: String,
    status_code: Option<u16>,
    stack: Option<String>,
    clear_stack: bool,
    fields: BTreeMap<String, Value>,
}

impl ResolverError {
    /// Create an error with the default name `Error`.
    ///
    /// A stack is captured when backtraces are enabled (`RUST_BACKTRACE`).
    pub fn new(message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            name: "Error".to_string(),
            message: message.into(),
            status_code: None,
            stack,
            clear_stack: false,
            fields: BTreeMap::new(),
        }
    }

    /// Wrap any standard error, keeping its display text as the message.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new(err.to_string())
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach a custom field that is transported next to `message`.
    ///
    /// `name`, `message` and `stack` are reserved; an error carrying one of them fails to encode.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Mark the error as intentionally client-facing: its stack is dropped before transport.
    pub fn clear_stack(mut self) -> Self {
        self.clear_stack = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// The stack that will be transported, `None` when absent or suppressed.
    pub fn stack(&self) -> Option<&str> {
        if self.clear_stack {
            None
        } else {
            self.stack.as_deref()
        }
    }

    pub fn is_stack_cleared(&self) -> bool {
        self.clear_stack
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ResolverError {}

impl From<anyhow::Error> for ResolverError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<CodecError> for ResolverError {
    fn from(err: CodecError) -> Self {
        Self::new(err.to_string()).with_name("SerializationError")
    }
}

/// Dispatch failures, one per kind the boundary knows how to answer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Request {location} is missing the `params` key")]
    ParamsMissing { location: ParamsLocation },

    #[error("{method} method not supported")]
    UnsupportedMethod { method: Method },

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// Map the error kind to the HTTP status written at the boundary.
    ///
    /// - 400: params missing at the expected location
    /// - 404: method outside HEAD/GET/POST
    /// - resolver status when set and in the 4xx/5xx range, otherwise 500
    /// - 500: codec failures
    pub fn status_code(&self) -> StatusCode {
        match self {
            RpcError::ParamsMissing { .. } => StatusCode::BAD_REQUEST,
            RpcError::UnsupportedMethod { .. } => StatusCode::NOT_FOUND,
            RpcError::Resolver(err) => err
                .status_code()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|status| status.is_client_error() || status.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            RpcError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
