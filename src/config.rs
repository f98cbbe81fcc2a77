use std::collections::HashMap;
use std::time::Duration;

/// Immutable, process-wide configuration for the HTTP engine.
///
/// `Config` carries no fallibility of its own: it is built once by the
/// caller (from a file, environment, or test fixture — this crate doesn't
/// care which) and shared, typically via [`std::sync::Arc`], across every
/// connection pair's pipelines. A field being "disabled" is expressed by its
/// companion bool (e.g. `routing_cookie_enabled`), not by validating the
/// string fields at construction time.
#[derive(Clone, Debug)]
pub struct Config {
    /// Header carrying the request correlation id. Synthesized (a fresh
    /// UUIDv4) when absent from an inbound request.
    pub request_id_header_name: String,

    /// Master switch for destination rewriting and the `addr`/`conn`
    /// channel protocol.
    pub routing_enabled: bool,
    /// Header consulted for the routing value.
    pub routing_header_name: String,
    /// Whether a cookie may also carry the routing value.
    pub routing_cookie_enabled: bool,
    /// Cookie name consulted when `routing_cookie_enabled`.
    pub routing_cookie_name: String,

    /// Header name → tag name, applied to inbound root spans.
    pub headers_map: HashMap<String, String>,
    /// Cookie name → tag name, applied to inbound root spans.
    pub cookies_map: HashMap<String, String>,

    /// Header used to decorate outbound requests with the caller's
    /// identity, set only when absent from the request.
    pub x_source_header_name: String,
    pub x_source_value: String,

    /// TTL for the request-id → span-context cache.
    pub tracing_cache_ttl: Duration,
    /// TTL for the request-id → routing-value cache.
    pub routing_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_id_header_name: "X-Request-Id".to_string(),
            routing_enabled: false,
            routing_header_name: "X-Route-To".to_string(),
            routing_cookie_enabled: false,
            routing_cookie_name: "route-to".to_string(),
            headers_map: HashMap::new(),
            cookies_map: HashMap::new(),
            x_source_header_name: "X-Source".to_string(),
            x_source_value: String::new(),
            tracing_cache_ttl: Duration::from_secs(60),
            routing_cache_ttl: Duration::from_secs(60),
        }
    }
}
