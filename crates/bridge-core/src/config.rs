//! Centralized configuration for the resolver bridge.
//!
//! This module provides the wire constants shared by the responders and the boundary adapter.

/// Request and envelope field names.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const PARAMS_KEY: &'static str = "params";
    pub const META_KEY: &'static str = "meta";
    pub const JSON_CONTENT_TYPE: &'static str = "application/json";
}

/// Event-stream response settings.
pub struct StreamConfig;

impl StreamConfig {
    pub const CONTENT_TYPE: &'static str = "text/event-stream;charset=utf-8";
    pub const CACHE_CONTROL: &'static str = "no-cache, no-transform";
    pub const ALLOW_ORIGIN: &'static str = "*";
    /// Disables proxy buffering (nginx and compatible intermediaries).
    pub const BUFFERING_HEADER: &'static str = "x-accel-buffering";
    pub const BUFFERING_DISABLED: &'static str = "no";
    pub const FRAME_PREFIX: &'static str = "data: ";
    pub const FRAME_SUFFIX: &'static str = "\n\n";
    /// Body channel capacity. One frame in flight keeps the producer throttled by the client.
    pub const BODY_CHANNEL_CAPACITY: usize = 1;
}
