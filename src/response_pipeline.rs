//! The response-side control loop: read HTTP/1.x responses off one socket,
//! forward them onto another, pair each with the oldest pending request and
//! finish its span.
//!
//! Two things only this side decides:
//! - whether a response is to a `HEAD` request, which changes how its body
//!   is framed (see [`crate::wire::response_body_framing`]) and forces the
//!   write around the pooled writer;
//! - whether the response itself carries `Connection: Upgrade`, which drops
//!   straight into transparent fall-through exactly like a parse error,
//!   before any pairing happens.

use crate::context::NetHttpRequest;
use crate::context::ResponseRecord;
use crate::dialer::HalfClose;
use crate::error::Result;
use crate::fallthrough::fall_through;
use crate::pool::BufferPool;
use crate::tee::TeeBuffer;
use crate::trace::Span;
use crate::wire::{content_length_tag, is_upgrade, response_body_framing, write_response_head, FrameReader, ParseOutcome};
use std::io::{Read, Write};

/// Runs the response pipeline to completion.
///
/// `conn` is the socket this side reads responses from, used only to force
/// a half-close when `force_close` is set and the status is not `100
/// Continue`: for `HEAD` it runs before the response write to unblock a
/// stuck upstream, bypassing the pooled buffered writer entirely; for every
/// other response the head is assembled through `pool` and written in one
/// shot, and the forced close (if any) runs after the write completes.
pub fn run<R, W, C, S>(
    mut fr: FrameReader<R>,
    writer: &mut W,
    conn: &C,
    ctx: &NetHttpRequest<S>,
    force_close: bool,
    pool: &BufferPool,
) -> Result<()>
where
    R: Read,
    W: Write,
    C: HalfClose,
    S: Span,
{
    loop {
        let mut tee = TeeBuffer::new();
        tee.start();

        let resp = match fr.parse_response(&mut tee)? {
            ParseOutcome::Eof => {
                tracing::trace!("response connection closed cleanly");
                ctx.clean_up();
                return Ok(());
            }
            ParseOutcome::ParseError => {
                tracing::debug!("response failed to parse as http/1.x, falling through to raw relay");
                fall_through(&mut fr, tee, writer)?;
                return Ok(());
            }
            ParseOutcome::Parsed(resp) => resp,
        };

        if is_upgrade(&resp.headers) {
            tracing::debug!("upgrade confirmed, falling through to raw relay");
            fall_through(&mut fr, tee, writer)?;
            return Ok(());
        }
        tee.stop();

        let head_response = ctx
            .pending_requests()
            .peek()
            .map(|req| req.method == http::Method::HEAD)
            .unwrap_or(false);
        let framing = response_body_framing(&resp.headers, head_response);
        let status = resp.status;

        if head_response {
            if force_close && status != http::StatusCode::CONTINUE {
                tracing::trace!("forcing connection closed ahead of a HEAD response");
                let _ = conn.shutdown_read();
                let _ = conn.shutdown_write();
            }
            write_response_head(writer, &resp)?;
            fr.copy_body(writer, framing)?;
            writer.flush()?;
        } else {
            let mut head_buf = pool.acquire();
            write_response_head(&mut *head_buf, &resp)?;
            writer.write_all(&head_buf)?;
            drop(head_buf);

            fr.copy_body(writer, framing)?;
            writer.flush()?;
            if force_close && status != http::StatusCode::CONTINUE {
                tracing::trace!("forcing connection closed after the response");
                let _ = conn.shutdown_read();
                let _ = conn.shutdown_write();
            }
        }

        ctx.pending_responses().push(ResponseRecord {
            status,
            content_length: content_length_tag(&resp.headers),
        });
        ctx.stop_request();
    }
}
