//! HTTP/1.x framing, routing and tracing engine for a service-mesh sidecar
//! proxy.
//!
//! This crate owns the pieces that are specific to speaking HTTP on behalf
//! of a proxied TCP connection pair: incremental request/response parsing
//! over a persistent buffer (correct under pipelining), re-serialization
//! onto the forwarding socket, request-id synthesis, destination rewriting
//! against a routing table, and starting/finishing trace spans. It does not
//! own TCP accept loops, TLS, or the concrete tracer/exporter — those are
//! assembled by whatever binary embeds it.

pub mod config;
pub mod context;
pub mod dialer;
pub mod error;
pub mod fallthrough;
pub mod pool;
pub mod request_pipeline;
pub mod response_pipeline;
pub mod routing;
pub mod tee;
pub mod trace;
pub mod wire;

pub use config::Config;
pub use context::NetHttpRequest;
pub use error::{Error, Result};
