//! Per-connection request context and span lifecycle.
//!
//! `NetHttpRequest` is the piece of state shared by the request and response
//! pipelines of one proxied connection pair: the three FIFOs that pair
//! pipelined requests, responses and spans, plus the direction flag and the
//! remote address recorded for tagging.

use crate::config::Config;
use crate::trace::{Span, SpanContext, TagValue, Tracer};
use crate::wire::ParsedRequest;
use http::HeaderMap;
use proxy_queue::Queue;
use proxy_ttl_cache::TtlCache;
use std::sync::RwLock;

/// The TTL cache bridging an inbound request's root span to the outbound
/// sibling connection that continues its trace.
pub type TracingContextCache<C> = TtlCache<String, C>;

/// The TTL cache bridging an inbound request's routing decision to the
/// outbound sibling connection that must honor it.
pub type RoutingContextCache = TtlCache<String, String>;

/// The subset of a parsed request retained after it has been forwarded, for
/// later pairing with its response and for span tagging.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    pub method: http::Method,
    /// Full URL string, used verbatim as the `http.path` tag.
    pub path: String,
    pub host: Option<String>,
    pub content_length: i64,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestRecord {
    pub fn from_parsed(req: &ParsedRequest, request_id_header_name: &str) -> Self {
        Self {
            method: req.method.clone(),
            path: req.uri.to_string(),
            host: req
                .headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            content_length: crate::wire::content_length_tag(&req.headers),
            user_agent: req
                .headers
                .get(http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            request_id: req
                .headers
                .get(request_id_header_name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// The subset of a parsed response retained for pairing and span tagging.
#[derive(Clone, Debug)]
pub struct ResponseRecord {
    pub status: http::StatusCode,
    pub content_length: i64,
}

/// Per-connection-pair shared state.
pub struct NetHttpRequest<S> {
    pending_requests: Queue<RequestRecord>,
    pending_responses: Queue<ResponseRecord>,
    open_spans: Queue<S>,
    is_inbound: bool,
    remote_addr: RwLock<Option<String>>,
}

impl<S: Span> NetHttpRequest<S> {
    pub fn new(is_inbound: bool) -> Self {
        Self {
            pending_requests: Queue::new(),
            pending_responses: Queue::new(),
            open_spans: Queue::new(),
            is_inbound,
            remote_addr: RwLock::new(None),
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.is_inbound
    }

    pub fn set_remote_addr(&self, addr: impl Into<String>) {
        *self.remote_addr.write().unwrap_or_else(|p| p.into_inner()) = Some(addr.into());
    }

    pub fn remote_addr(&self) -> Option<String> {
        self.remote_addr.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn pending_requests(&self) -> &Queue<RequestRecord> {
        &self.pending_requests
    }

    pub fn pending_responses(&self) -> &Queue<ResponseRecord> {
        &self.pending_responses
    }

    pub fn open_spans(&self) -> &Queue<S> {
        &self.open_spans
    }

    /// Starts a span for a freshly-parsed, about-to-be-forwarded request and
    /// pushes both it and `record` onto their queues.
    ///
    /// `req` is passed mutably because a root span on an outbound pipeline
    /// injects its own context back into the request's headers for
    /// downstream propagation.
    pub fn start_request<T>(
        &self,
        tracer: &T,
        req: &mut ParsedRequest,
        record: RequestRecord,
        config: &Config,
        tracing_cache: &TracingContextCache<T::Context>,
    ) where
        T: Tracer<Span = S>,
    {
        let operation_name = if self.is_inbound {
            req.uri.path().to_string()
        } else {
            let host = req
                .headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            format!("{}{}", host, req.uri.path())
        };

        let mut span = match tracer.extract(&req.headers) {
            Some(parent) => {
                let span = tracer.start_child_span(&operation_name, &parent);
                if self.is_inbound {
                    if let Some(request_id) = &record.request_id {
                        tracing_cache.insert(request_id.clone(), span.context());
                    }
                }
                span
            }
            None => {
                let span = tracer.start_root_span(&operation_name);
                if self.is_inbound {
                    if let Some(request_id) = &record.request_id {
                        tracing_cache.insert(request_id.clone(), span.context());
                    }
                } else {
                    let context = span.context();
                    tracer.inject(&context, &mut req.headers);
                }
                span
            }
        };

        if self.is_inbound && tracer.extract(&req.headers).is_none() {
            // Only root spans (no parent found) pick up configured tag maps.
            // `extract` is pure and cheap to call again here; avoids
            // threading a bool out of the match above.
            apply_header_tags(&mut span, &req.headers, config);
            apply_cookie_tags(&mut span, &req.headers, config);
        }

        self.pending_requests.push(record);
        self.open_spans.push(span);
    }

    /// Pairs the oldest pending request, response and span and finishes the
    /// span. A response with no outstanding request/span is silently
    /// dropped. A request whose span is finished before its response
    /// arrives (connection-teardown cleanup) is tagged `error`/`timeout`.
    pub fn stop_request(&self) {
        let request = self.pending_requests.pop();
        let response = self.pending_responses.pop();
        let span = match self.open_spans.pop() {
            Some(span) => span,
            None => return,
        };
        self.finish_span(span, request, response);
    }

    fn finish_span(&self, mut span: S, request: Option<RequestRecord>, response: Option<ResponseRecord>) {
        span.set_tag("span.kind", if self.is_inbound { "server" } else { "client" });
        if let Some(addr) = self.remote_addr() {
            span.set_tag("remote_addr", addr);
        }

        if let Some(req) = &request {
            if let Some(host) = &req.host {
                span.set_tag("http.host", host.clone());
            }
            span.set_tag("http.path", req.path.clone());
            span.set_tag("http.request_size", req.content_length);
            span.set_tag("http.method", req.method.to_string());
            if let Some(ua) = &req.user_agent {
                span.set_tag("http.user_agent", ua.clone());
            }
            if let Some(rid) = &req.request_id {
                span.set_tag("http.request_id", rid.clone());
            }
        }

        match &response {
            Some(resp) => {
                span.set_tag("http.response_size", resp.content_length);
                span.set_tag("http.status_code", resp.status.as_u16() as i64);
                if resp.status.as_u16() >= 500 {
                    span.set_tag("error", true);
                }
            }
            None if request.is_some() => {
                span.set_tag("error", true);
                span.set_tag("timeout", true);
            }
            None => {}
        }

        span.finish();
    }

    /// Drains every queue, finishing any span left without a paired
    /// response as `error`/`timeout`. Called exactly once per connection
    /// pair when either pipeline detects the connection has ended.
    pub fn clean_up(&self) {
        let mut requests = self.pending_requests.clear().into_iter();
        let mut responses = self.pending_responses.clear().into_iter();
        for span in self.open_spans.clear() {
            self.finish_span(span, requests.next(), responses.next());
        }
    }
}

fn apply_header_tags<S: Span>(span: &mut S, headers: &HeaderMap, config: &Config) {
    if config.headers_map.len() <= headers.len() {
        for (header_name, tag_name) in &config.headers_map {
            if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
                span.set_tag(tag_name, TagValue::Str(value.to_string()));
            }
        }
    } else {
        for (name, value) in headers.iter() {
            if let Some(tag_name) = config.headers_map.get(name.as_str()) {
                if let Ok(value) = value.to_str() {
                    span.set_tag(tag_name, TagValue::Str(value.to_string()));
                }
            }
        }
    }
}

fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get(http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let name = parts.next()?.trim();
                    let value = parts.next()?.trim();
                    Some((name.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn apply_cookie_tags<S: Span>(span: &mut S, headers: &HeaderMap, config: &Config) {
    let cookies = parse_cookies(headers);
    if config.cookies_map.len() <= cookies.len() {
        for (cookie_name, tag_name) in &config.cookies_map {
            if let Some((_, value)) = cookies.iter().find(|(name, _)| name == cookie_name) {
                span.set_tag(tag_name, TagValue::Str(value.clone()));
            }
        }
    } else {
        for (name, value) in &cookies {
            if let Some(tag_name) = config.cookies_map.get(name) {
                span.set_tag(tag_name, TagValue::Str(value.clone()));
            }
        }
    }
}
