//! The tracer contract this engine consumes.
//!
//! The concrete tracer (an OTLP exporter, a collector client, a no-op stub
//! for tests) lives outside this crate — see §1 of the design notes. What
//! the engine needs from it is exactly the OpenTelemetry-shaped surface
//! described below: extract/inject a context through HTTP headers, start a
//! root or child-of span, tag it, and finish it.

use std::fmt;

/// A tag value attached to a span.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => write!(f, "{}", s),
            TagValue::Int(n) => write!(f, "{}", n),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// An opaque, serializable handle to the parent of a span.
///
/// Stored by value in the two TTL caches and propagated across the
/// inbound/outbound legs of a logical request as a single header value.
pub trait SpanContext: Clone + Send + Sync + 'static {
    /// Serializes this context into a single wire header value.
    fn to_header_value(&self) -> String;
}

/// A single in-flight span.
pub trait Span: Send + 'static {
    type Context: SpanContext;

    fn set_tag(&mut self, key: &str, value: impl Into<TagValue>);

    /// The context of this span, for propagation to downstream hops or
    /// storage in the tracing cache.
    fn context(&self) -> Self::Context;

    /// Finishes the span, recording its duration.
    fn finish(self);
}

/// Extract/inject/start-span boundary the engine drives.
pub trait Tracer: Clone + Send + Sync + 'static {
    type Context: SpanContext;
    type Span: Span<Context = Self::Context>;

    /// Attempts to extract a parent span context carried on `headers`.
    fn extract(&self, headers: &http::HeaderMap) -> Option<Self::Context>;

    /// Injects `context` into `headers` so a downstream hop can continue the
    /// trace.
    fn inject(&self, context: &Self::Context, headers: &mut http::HeaderMap);

    /// Starts a new root span named `operation_name`.
    fn start_root_span(&self, operation_name: &str) -> Self::Span;

    /// Starts a span named `operation_name` that is a child of `parent`.
    fn start_child_span(&self, operation_name: &str, parent: &Self::Context) -> Self::Span;
}

/// An in-memory [`Tracer`] usable from both this crate's own tests and
/// integration tests in `tests/`. Kept unconditionally public rather than
/// split into a separate crate, given the engine's small surface area.
pub mod test_util {
    //! An in-memory tracer for tests and doctests: contexts are just the
    //! span's own id, `extract`/`inject` round-trip through a header named
    //! `traceparent`, and finished spans are recorded for inspection.

    use super::{Span as SpanTrait, SpanContext as SpanContextTrait, TagValue, Tracer as TracerTrait};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct TestContext(pub u64);

    impl SpanContextTrait for TestContext {
        fn to_header_value(&self) -> String {
            format!("test-trace-{}", self.0)
        }
    }

    impl TestContext {
        pub fn from_header_value(v: &str) -> Option<Self> {
            v.strip_prefix("test-trace-")?.parse().ok().map(TestContext)
        }
    }

    #[derive(Debug, Clone)]
    pub struct FinishedSpan {
        pub operation_name: String,
        pub context: TestContext,
        pub parent: Option<TestContext>,
        pub tags: HashMap<String, TagValue>,
    }

    #[derive(Clone, Default)]
    pub struct TestTracer {
        next_id: Arc<AtomicU64>,
        pub finished: Arc<Mutex<Vec<FinishedSpan>>>,
    }

    pub struct TestSpan {
        operation_name: String,
        context: TestContext,
        parent: Option<TestContext>,
        tags: HashMap<String, TagValue>,
        finished: Arc<Mutex<Vec<FinishedSpan>>>,
    }

    impl SpanTrait for TestSpan {
        type Context = TestContext;

        fn set_tag(&mut self, key: &str, value: impl Into<TagValue>) {
            self.tags.insert(key.to_string(), value.into());
        }

        fn context(&self) -> TestContext {
            self.context.clone()
        }

        fn finish(self) {
            self.finished.lock().unwrap().push(FinishedSpan {
                operation_name: self.operation_name,
                context: self.context,
                parent: self.parent,
                tags: self.tags,
            });
        }
    }

    impl TracerTrait for TestTracer {
        type Context = TestContext;
        type Span = TestSpan;

        fn extract(&self, headers: &http::HeaderMap) -> Option<TestContext> {
            headers
                .get("traceparent")
                .and_then(|v| v.to_str().ok())
                .and_then(TestContext::from_header_value)
        }

        fn inject(&self, context: &TestContext, headers: &mut http::HeaderMap) {
            headers.insert(
                "traceparent",
                http::HeaderValue::from_str(&context.to_header_value()).unwrap(),
            );
        }

        fn start_root_span(&self, operation_name: &str) -> TestSpan {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            TestSpan {
                operation_name: operation_name.to_string(),
                context: TestContext(id),
                parent: None,
                tags: HashMap::new(),
                finished: self.finished.clone(),
            }
        }

        fn start_child_span(&self, operation_name: &str, parent: &TestContext) -> TestSpan {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            TestSpan {
                operation_name: operation_name.to_string(),
                context: TestContext(id),
                parent: Some(parent.clone()),
                tags: HashMap::new(),
                finished: self.finished.clone(),
            }
        }
    }
}
