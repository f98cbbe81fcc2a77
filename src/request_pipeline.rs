//! The request-side control loop: read HTTP/1.x requests off one socket,
//! forward them onto another, synthesizing request ids, resolving routing
//! decisions, and starting spans along the way.
//!
//! Dialing the outbound connection that requests get forwarded onto is not
//! this module's job — see [`crate::dialer`] for the `addr`/`conn` channel
//! contract a caller assembling a full connection pair uses to obtain it.
//! When routing is disabled the loop just writes onto a single [`OutboundWriter::Fixed`]
//! writer for its whole lifetime; when routing is enabled it drives that
//! channel contract itself via [`OutboundWriter::Routed`], proposing a
//! destination and waiting for the dialer's connection every iteration. It
//! reports the remote address that `W` (outbound) or the source reader
//! (inbound) is known to be talking to, for recording on the shared context.

use crate::config::Config;
use crate::context::{NetHttpRequest, RequestRecord, RoutingContextCache, TracingContextCache};
use crate::dialer::DialResult;
use crate::error::Result;
use crate::fallthrough::fall_through;
use crate::pool::BufferPool;
use crate::routing;
use crate::tee::TeeBuffer;
use crate::trace::{Span, Tracer};
use crate::wire::{is_upgrade, request_body_framing, write_request_head, FrameReader, ParseOutcome, ParsedRequest};
use std::io::{Read, Write};
use std::sync::mpsc::{Receiver, SyncSender};

/// Where this iteration's forwarded bytes go.
///
/// `Fixed` is a single writer held for the pipeline's whole lifetime (routing
/// disabled — the caller already knows the one outbound connection). `Routed`
/// drives the `addr`/`conn` channel protocol of §4.1 step 4 / §4.5: every
/// iteration proposes a destination on `addr_tx` and blocks on `conn_rx` for
/// the concrete connection to use. Dropping a `Routed` target closes
/// `addr_tx`, the dialer's signal to stop.
pub enum OutboundWriter<'a, W> {
    Fixed(&'a mut W),
    Routed {
        addr_tx: SyncSender<String>,
        conn_rx: Receiver<DialResult<W>>,
        current: Option<W>,
    },
}

impl<'a, W> OutboundWriter<'a, W> {
    /// Proposes `destination` and blocks for the connection to write this
    /// iteration onto. A `Fixed` target ignores `destination` — no channel
    /// protocol is active. Returns `false` on a null sentinel or a closed
    /// channel, signaling the pipeline should exit.
    fn negotiate(&mut self, destination: &str) -> bool {
        match self {
            OutboundWriter::Fixed(_) => true,
            OutboundWriter::Routed { addr_tx, conn_rx, current } => {
                if addr_tx.send(destination.to_string()).is_err() {
                    return false;
                }
                match conn_rx.recv() {
                    Ok(Ok(conn)) => {
                        *current = Some(conn);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// The writer negotiated for this iteration. Panics if called on a
    /// `Routed` target before a successful `negotiate` — callers always
    /// negotiate first when routing is enabled.
    fn writer(&mut self) -> &mut W {
        match self {
            OutboundWriter::Fixed(w) => w,
            OutboundWriter::Routed { current, .. } => current.as_mut().expect("writer negotiated before use"),
        }
    }
}

fn ensure_request_id(req: &mut ParsedRequest, config: &Config) {
    if req.headers.get(&config.request_id_header_name).is_none() {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = http::HeaderValue::from_str(&id) {
            if let Ok(name) = http::HeaderName::from_bytes(config.request_id_header_name.as_bytes()) {
                req.headers.insert(name, value);
            }
        }
    }
}

fn apply_source_header(req: &mut ParsedRequest, config: &Config) {
    if config.x_source_header_name.is_empty() || req.headers.get(&config.x_source_header_name).is_some() {
        return;
    }
    if let (Ok(name), Ok(value)) = (
        http::HeaderName::from_bytes(config.x_source_header_name.as_bytes()),
        http::HeaderValue::from_str(&config.x_source_value),
    ) {
        req.headers.insert(name, value);
    }
}

fn request_id_of(req: &ParsedRequest, config: &Config) -> Option<String> {
    req.headers
        .get(&config.request_id_header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Computes the destination to propose on `addr_tx` for this request.
///
/// Inbound: cache whatever routing value was found (cookie, header, or a
/// value already cached by a prior hop) under the request-id, so the
/// sibling outbound connection can honor it without needing the header or
/// cookie present on its own leg; the inbound destination itself is never
/// rewritten, so the proposal is always `original_dst`. Outbound: resolve
/// the cached/observed value against `original_dst` and propose the result.
/// A resolver error is logged and the original destination is proposed
/// instead of failing the connection — see §7.
fn compute_destination(req: &ParsedRequest, ctx_is_inbound: bool, request_id: Option<&str>, config: &Config, routing_cache: &RoutingContextCache, original_dst: &str) -> String {
    let Some(value) = routing::routing_value(&req.headers, request_id, config, routing_cache) else {
        return original_dst.to_string();
    };

    if ctx_is_inbound {
        if let Some(id) = request_id {
            routing_cache.insert(id.to_string(), value);
        }
        return original_dst.to_string();
    }

    let request_host = req
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    match routing::resolve(&value, request_host, original_dst) {
        Ok(destination) => destination,
        Err(err) => {
            tracing::warn!(%err, "routing resolver failed, proposing original destination");
            original_dst.to_string()
        }
    }
}

/// Runs the request pipeline to completion: until the source connection is
/// cleanly closed, a message fails to parse (transparent fall-through), or
/// an HTTP upgrade is detected (transparent fall-through, no span emitted
/// for the upgrade request itself).
#[allow(clippy::too_many_arguments)]
pub fn run<R, W, T>(
    mut fr: FrameReader<R>,
    mut target: OutboundWriter<'_, W>,
    ctx: &NetHttpRequest<T::Span>,
    tracer: &T,
    config: &Config,
    tracing_cache: &TracingContextCache<T::Context>,
    routing_cache: &RoutingContextCache,
    pool: &BufferPool,
    original_dst: &str,
    remote_addr: &str,
) -> Result<()>
where
    R: Read,
    W: Write,
    T: Tracer,
{
    loop {
        let mut tee = TeeBuffer::new();
        tee.start();

        let mut req = match fr.parse_request(&mut tee)? {
            ParseOutcome::Eof => {
                tracing::trace!("request connection closed cleanly");
                ctx.clean_up();
                return Ok(());
            }
            ParseOutcome::ParseError => {
                tracing::debug!("request failed to parse as http/1.x, falling through to raw relay");
                if config.routing_enabled && !target.negotiate(original_dst) {
                    tracing::debug!("dialer closed the destination channel, exiting");
                    ctx.clean_up();
                    return Ok(());
                }
                fall_through(&mut fr, tee, target.writer())?;
                return Ok(());
            }
            ParseOutcome::Parsed(req) => req,
        };

        ensure_request_id(&mut req, config);
        let request_id = request_id_of(&req, config);

        if config.routing_enabled {
            let destination = compute_destination(&req, ctx.is_inbound(), request_id.as_deref(), config, routing_cache, original_dst);
            if !target.negotiate(&destination) {
                tracing::debug!("dialer returned no connection, exiting");
                ctx.clean_up();
                return Ok(());
            }
        }

        ctx.set_remote_addr(remote_addr);

        if is_upgrade(&req.headers) {
            tracing::debug!("upgrade requested, falling through to raw relay");
            fall_through(&mut fr, tee, target.writer())?;
            return Ok(());
        }
        tee.stop();

        if !ctx.is_inbound() {
            apply_source_header(&mut req, config);
            if let Some(id) = &request_id {
                if let Some(parent) = tracing_cache.get(id) {
                    tracer.inject(&parent, &mut req.headers);
                }
            }
        }

        let framing = request_body_framing(&req.headers);
        let record = RequestRecord::from_parsed(&req, &config.request_id_header_name);
        tracing::trace!(method = %record.method, path = %record.path, "forwarding request");

        let writer = target.writer();
        let mut head_buf = pool.acquire();
        write_request_head(&mut *head_buf, &req)?;
        writer.write_all(&head_buf)?;
        drop(head_buf);

        fr.copy_body(writer, framing)?;
        writer.flush()?;

        ctx.start_request(tracer, &mut req, record, config, tracing_cache);
    }
}
