//! Scenario-level coverage driving the request and response pipelines
//! together over real socket pairs, the way a proxied connection actually
//! exercises them: one pipeline forwards what it reads from the downstream
//! leg onto the upstream leg, the other forwards upstream's reply back.

use mesh_http_engine::config::Config;
use mesh_http_engine::context::{NetHttpRequest, RoutingContextCache, TracingContextCache};
use mesh_http_engine::pool::BufferPool;
use mesh_http_engine::request_pipeline::OutboundWriter;
use mesh_http_engine::trace::test_util::{TestContext, TestSpan, TestTracer};
use mesh_http_engine::wire::FrameReader;
use mesh_http_engine::{request_pipeline, response_pipeline};

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

fn harness() -> (Config, TestTracer, TracingContextCache<TestContext>, RoutingContextCache, BufferPool) {
    (
        Config::default(),
        TestTracer::default(),
        TracingContextCache::new(Duration::from_secs(60)),
        RoutingContextCache::new(Duration::from_secs(60)),
        BufferPool::new(1024),
    )
}

#[test]
fn basic_request_response_round_trip_through_both_pipelines() {
    let (config, tracer, tracing_cache, routing_cache, pool) = harness();
    let ctx = Arc::new(NetHttpRequest::<TestSpan>::new(true));
    let ctx_for_requests = ctx.clone();
    let ctx_for_responses = ctx.clone();

    let (client_sock, downstream_proxy_side) = UnixStream::pair().unwrap();
    let downstream_read = downstream_proxy_side.try_clone().unwrap();
    let downstream_write = downstream_proxy_side;

    let (upstream_fake, proxy_upstream_side) = UnixStream::pair().unwrap();
    let upstream_write = proxy_upstream_side.try_clone().unwrap();
    let upstream_read = proxy_upstream_side;

    let fake_upstream = std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let n = upstream_fake.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /widgets"));
        upstream_fake
            .try_clone()
            .unwrap()
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
            .unwrap();
    });

    let request_thread = std::thread::spawn(move || {
        let mut upstream_write = upstream_write;
        let fr = FrameReader::new(downstream_read);
        request_pipeline::run(
            fr,
            OutboundWriter::Fixed(&mut upstream_write),
            &ctx_for_requests,
            &tracer,
            &config,
            &tracing_cache,
            &routing_cache,
            &pool,
            "10.0.0.1:80",
            "127.0.0.1:1",
        )
        .unwrap();
        tracer
    });

    let response_thread = std::thread::spawn(move || {
        let mut downstream_write = downstream_write;
        let conn = upstream_read.try_clone().unwrap();
        let fr = FrameReader::new(upstream_read);
        response_pipeline::run(fr, &mut downstream_write, &conn, &ctx_for_responses, false, &BufferPool::new(1024)).unwrap();
    });

    client_sock
        .try_clone()
        .unwrap()
        .write_all(b"GET /widgets HTTP/1.1\r\nHost: app.local\r\n\r\n")
        .unwrap();
    client_sock.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    client_sock.try_clone().unwrap().read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi");

    fake_upstream.join().unwrap();
    let tracer = request_thread.join().unwrap();
    response_thread.join().unwrap();

    assert_eq!(tracer.finished.lock().unwrap().len(), 1);
    assert!(ctx.pending_requests().is_empty());
}

#[test]
fn malformed_request_falls_through_end_to_end() {
    let (config, tracer, tracing_cache, routing_cache, pool) = harness();
    let ctx: NetHttpRequest<TestSpan> = NetHttpRequest::new(true);

    let (client_sock, downstream_proxy_side) = UnixStream::pair().unwrap();
    let (upstream_fake, proxy_upstream_side) = UnixStream::pair().unwrap();

    let request_thread = std::thread::spawn(move || {
        let mut upstream_write = proxy_upstream_side;
        let fr = FrameReader::new(downstream_proxy_side);
        request_pipeline::run(
            fr,
            OutboundWriter::Fixed(&mut upstream_write),
            &ctx,
            &tracer,
            &config,
            &tracing_cache,
            &routing_cache,
            &pool,
            "10.0.0.1:80",
            "127.0.0.1:1",
        )
        .unwrap();
        ctx
    });

    client_sock
        .try_clone()
        .unwrap()
        .write_all(b"not an http request at all\r\n\r\n")
        .unwrap();
    client_sock.shutdown(Shutdown::Write).unwrap();

    let mut relayed = Vec::new();
    upstream_fake.try_clone().unwrap().read_to_end(&mut relayed).unwrap();
    assert_eq!(relayed, b"not an http request at all\r\n\r\n");

    let ctx = request_thread.join().unwrap();
    assert!(ctx.open_spans().is_empty());
}

#[test]
fn upgrade_request_falls_through_end_to_end_with_no_span() {
    let (config, tracer, tracing_cache, routing_cache, pool) = harness();
    let ctx: NetHttpRequest<TestSpan> = NetHttpRequest::new(true);

    let (client_sock, downstream_proxy_side) = UnixStream::pair().unwrap();
    let (upstream_fake, proxy_upstream_side) = UnixStream::pair().unwrap();

    let request_thread = std::thread::spawn(move || {
        let mut upstream_write = proxy_upstream_side;
        let fr = FrameReader::new(downstream_proxy_side);
        request_pipeline::run(
            fr,
            OutboundWriter::Fixed(&mut upstream_write),
            &ctx,
            &tracer,
            &config,
            &tracing_cache,
            &routing_cache,
            &pool,
            "10.0.0.1:80",
            "127.0.0.1:1",
        )
        .unwrap();
        ctx
    });

    let request = b"GET /ws HTTP/1.1\r\nHost: app.local\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\nopaque-frame-bytes".to_vec();
    client_sock.try_clone().unwrap().write_all(&request).unwrap();
    client_sock.shutdown(Shutdown::Write).unwrap();

    let mut relayed = Vec::new();
    upstream_fake.try_clone().unwrap().read_to_end(&mut relayed).unwrap();
    assert_eq!(relayed, request);

    let ctx = request_thread.join().unwrap();
    assert!(ctx.open_spans().is_empty());
    assert!(ctx.pending_requests().is_empty());
}

#[test]
fn pipelined_requests_are_paired_with_responses_in_order() {
    let (config, tracer, tracing_cache, routing_cache, pool) = harness();
    let ctx = Arc::new(NetHttpRequest::<TestSpan>::new(true));
    let ctx_for_requests = ctx.clone();
    let ctx_for_responses = ctx.clone();

    let (client_sock, downstream_proxy_side) = UnixStream::pair().unwrap();
    let downstream_read = downstream_proxy_side.try_clone().unwrap();
    let downstream_write = downstream_proxy_side;

    let (upstream_fake, proxy_upstream_side) = UnixStream::pair().unwrap();
    let upstream_write = proxy_upstream_side.try_clone().unwrap();
    let upstream_read = proxy_upstream_side;

    let fake_upstream = std::thread::spawn(move || {
        let mut buf = Vec::new();
        upstream_fake.try_clone().unwrap().read_to_end(&mut buf).unwrap();
        let forwarded = String::from_utf8(buf).unwrap();
        assert!(forwarded.contains("/one"));
        assert!(forwarded.contains("/two"));
        upstream_fake
            .try_clone()
            .unwrap()
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb")
            .unwrap();
    });

    let request_thread = std::thread::spawn(move || {
        let mut upstream_write = upstream_write;
        let fr = FrameReader::new(downstream_read);
        request_pipeline::run(
            fr,
            OutboundWriter::Fixed(&mut upstream_write),
            &ctx_for_requests,
            &tracer,
            &config,
            &tracing_cache,
            &routing_cache,
            &pool,
            "10.0.0.1:80",
            "127.0.0.1:1",
        )
        .unwrap();
        tracer
    });

    let response_thread = std::thread::spawn(move || {
        let mut downstream_write = downstream_write;
        let conn = upstream_read.try_clone().unwrap();
        let fr = FrameReader::new(upstream_read);
        response_pipeline::run(fr, &mut downstream_write, &conn, &ctx_for_responses, false, &BufferPool::new(1024)).unwrap();
    });

    let data = b"GET /one HTTP/1.1\r\nHost: h\r\n\r\nGET /two HTTP/1.1\r\nHost: h\r\n\r\n";
    client_sock.try_clone().unwrap().write_all(data).unwrap();
    client_sock.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    client_sock.try_clone().unwrap().read_to_end(&mut reply).unwrap();
    assert_eq!(
        reply,
        b"HTTP/1.1 200 OK\r\ncontent-length: 1\r\n\r\naHTTP/1.1 200 OK\r\ncontent-length: 1\r\n\r\nb".to_vec()
    );

    fake_upstream.join().unwrap();
    let tracer = request_thread.join().unwrap();
    response_thread.join().unwrap();

    assert_eq!(tracer.finished.lock().unwrap().len(), 2);
    assert!(ctx.pending_requests().is_empty());
}
