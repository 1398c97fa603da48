//! Network layer for Tapedeck
//!
//! Accepts client connections with bounded concurrency and forwards
//! recorded traffic to the upstream.

mod client;
mod handler;
mod http;
mod limiter;

pub use client::{strip_hop_by_hop, Forwarder, HttpClient, UpstreamBody};
pub use handler::{NetworkHandler, ShutdownHandle};
pub use http::{
    error_response, error_status, full, json_response, read_body, text_response, ChannelBody,
    ProxyBody,
};
pub use limiter::ConnectionLimiter;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
