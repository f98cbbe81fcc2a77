//! HTTP/1.x request and response framing.
//!
//! Parsing is driven by `httparse` over a small, reusable accumulator that
//! persists for the lifetime of one connection's pipeline loop — this is the
//! "pooled buffered reader" described in the engine's design: pipelined
//! requests that arrive back-to-back in a single socket read land in the
//! same buffer and simply get picked up by the next loop iteration.

use crate::tee::TeeBuffer;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

const MAX_HEADERS: usize = 64;
const MAX_HEADER_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub version: u8,
    pub headers: http::HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: http::StatusCode,
    pub version: u8,
    pub headers: http::HeaderMap,
}

/// Outcome of attempting to parse one message off a [`FrameReader`].
pub enum ParseOutcome<T> {
    /// A full set of headers was parsed.
    Parsed(T),
    /// The reader hit EOF before any bytes were read for this message.
    Eof,
    /// The peer closed the socket mid-message, or the bytes were not valid
    /// HTTP/1.x framing.
    ParseError,
}

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (e.g. a GET request, or a response to a HEAD request).
    None,
    /// Exactly `n` bytes of body follow the headers.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// No framing header at all; the body runs until the connection closes.
    /// Only valid for responses.
    UntilClose,
}

/// Declared `Content-Length`, or -1 if absent/invalid, for span tagging.
pub fn content_length_tag(headers: &http::HeaderMap) -> i64 {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(-1)
}

/// True if `Connection` names `upgrade` (case-insensitive; `Connection` may
/// carry a comma-separated token list, e.g. `keep-alive, Upgrade`).
///
/// Checked identically on requests and responses: either side observing it
/// on a successfully-parsed message means the bytes that follow are opaque
/// to HTTP/1.x and must be relayed raw from here on.
pub fn is_upgrade(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false)
}

fn is_chunked(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .last()
                .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Determines how to read the body that follows `headers`.
///
/// `head_response` must be `true` when this is a response to a request whose
/// method was HEAD: such responses never carry a body, whatever
/// `Content-Length`/`Transfer-Encoding` they advertise.
pub fn request_body_framing(headers: &http::HeaderMap) -> BodyFraming {
    if is_chunked(headers) {
        return BodyFraming::Chunked;
    }
    match content_length_tag(headers) {
        n if n >= 0 => BodyFraming::Fixed(n as u64),
        _ => BodyFraming::None,
    }
}

pub fn response_body_framing(headers: &http::HeaderMap, head_response: bool) -> BodyFraming {
    if head_response {
        return BodyFraming::None;
    }
    if is_chunked(headers) {
        return BodyFraming::Chunked;
    }
    match content_length_tag(headers) {
        n if n >= 0 => BodyFraming::Fixed(n as u64),
        _ => BodyFraming::UntilClose,
    }
}

/// Re-serializes a parsed request's head (request line + headers + blank
/// line) verbatim onto `writer`. The body, if any, is copied separately by
/// [`FrameReader::copy_body`].
pub fn write_request_head<W: Write>(writer: &mut W, req: &ParsedRequest) -> io::Result<()> {
    write!(writer, "{} {} HTTP/1.{}\r\n", req.method, req.uri, req.version)?;
    write_headers(writer, &req.headers)
}

/// Re-serializes a parsed response's head the same way.
pub fn write_response_head<W: Write>(writer: &mut W, resp: &ParsedResponse) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.{} {}{}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.canonical_reason().map(|r| format!(" {}", r)).unwrap_or_default()
    )?;
    write_headers(writer, &resp.headers)
}

fn write_headers<W: Write>(writer: &mut W, headers: &http::HeaderMap) -> io::Result<()> {
    for (name, value) in headers.iter() {
        writer.write_all(name.as_str().as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(value.as_bytes())?;
        writer.write_all(b"\r\n")?;
    }
    writer.write_all(b"\r\n")
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn headers_from_httparse(raw: &[httparse::Header<'_>]) -> io::Result<http::HeaderMap> {
    let mut headers = http::HeaderMap::with_capacity(raw.len());
    for h in raw {
        if h.name.is_empty() {
            continue;
        }
        let name = http::HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| invalid("bad header name"))?;
        let value = http::HeaderValue::from_bytes(h.value).map_err(|_| invalid("bad header value"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// A reusable, stateful framer over one half of a TCP connection.
///
/// One `FrameReader` is constructed per connection and lives for the whole
/// pipeline loop. Bytes read from the socket but not yet consumed by a
/// parsed message (e.g. the start of the next pipelined request) stay
/// buffered here across loop iterations.
pub struct FrameReader<R> {
    reader: R,
    buf: VecDeque<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: VecDeque::new(),
        }
    }

    /// Reads one chunk from the socket into the buffer. Not mirrored into
    /// any tee: only bytes a successful parse actually consumes get
    /// mirrored (see `parse_request`/`parse_response`), so a byte that ends
    /// up on a fall-through path is read from `buf` exactly once.
    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk)?;
        if n > 0 {
            self.buf.extend(chunk[..n].iter().copied());
        }
        Ok(n)
    }

    /// Parses one HTTP request off the buffer, reading more from the socket
    /// as needed. `tee` must already be armed (started) by the caller; only
    /// the bytes of a successfully parsed head are mirrored into it, so a
    /// parse failure leaves every read byte sitting in `buf` for fall-through
    /// to copy exactly once.
    pub fn parse_request(&mut self, tee: &mut TeeBuffer) -> io::Result<ParseOutcome<ParsedRequest>> {
        loop {
            let slice = self.buf.make_contiguous();
            let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut header_storage);
            match req.parse(slice) {
                Ok(httparse::Status::Complete(n)) => {
                    let method = req
                        .method
                        .ok_or_else(|| invalid("missing method"))
                        .and_then(|m| http::Method::from_bytes(m.as_bytes()).map_err(|_| invalid("bad method")))?;
                    let uri: http::Uri = req
                        .path
                        .ok_or_else(|| invalid("missing path"))?
                        .parse()
                        .map_err(|_| invalid("bad uri"))?;
                    let version = req.version.ok_or_else(|| invalid("missing version"))?;
                    let headers = headers_from_httparse(req.headers)?;
                    tee.mirror(&slice[..n]);
                    self.buf.drain(..n);
                    return Ok(ParseOutcome::Parsed(ParsedRequest {
                        method,
                        uri,
                        version,
                        headers,
                    }));
                }
                Ok(httparse::Status::Partial) => {}
                Err(_) => return Ok(ParseOutcome::ParseError),
            }

            if self.buf.len() > MAX_HEADER_BYTES {
                return Ok(ParseOutcome::ParseError);
            }

            match self.fill() {
                Ok(0) if self.buf.is_empty() => return Ok(ParseOutcome::Eof),
                Ok(0) => return Ok(ParseOutcome::ParseError),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(ParseOutcome::Eof),
                Err(e) => return Err(e),
            }
        }
    }

    /// Parses one HTTP response off the buffer. There is no associated
    /// request at this layer; HEAD-awareness for body framing is applied by
    /// the caller after peeking the connection's pending-request queue.
    /// Mirroring follows the same only-what-was-consumed rule as
    /// `parse_request`.
    pub fn parse_response(&mut self, tee: &mut TeeBuffer) -> io::Result<ParseOutcome<ParsedResponse>> {
        loop {
            let slice = self.buf.make_contiguous();
            let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut resp = httparse::Response::new(&mut header_storage);
            match resp.parse(slice) {
                Ok(httparse::Status::Complete(n)) => {
                    let code = resp.code.ok_or_else(|| invalid("missing status code"))?;
                    let status = http::StatusCode::from_u16(code).map_err(|_| invalid("bad status code"))?;
                    let version = resp.version.ok_or_else(|| invalid("missing version"))?;
                    let headers = headers_from_httparse(resp.headers)?;
                    tee.mirror(&slice[..n]);
                    self.buf.drain(..n);
                    return Ok(ParseOutcome::Parsed(ParsedResponse {
                        status,
                        version,
                        headers,
                    }));
                }
                Ok(httparse::Status::Partial) => {}
                Err(_) => return Ok(ParseOutcome::ParseError),
            }

            if self.buf.len() > MAX_HEADER_BYTES {
                return Ok(ParseOutcome::ParseError);
            }

            match self.fill() {
                Ok(0) if self.buf.is_empty() => return Ok(ParseOutcome::Eof),
                Ok(0) => return Ok(ParseOutcome::ParseError),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(ParseOutcome::Eof),
                Err(e) => return Err(e),
            }
        }
    }

    /// Copies exactly the body declared by `framing` to `writer`, draining
    /// already-buffered bytes first and falling back to direct reads from
    /// the socket. Never mirrored into a tee: bodies are not replayed by
    /// fall-through, since fall-through only ever triggers on header parse
    /// failure.
    pub fn copy_body<W: Write>(&mut self, writer: &mut W, framing: BodyFraming) -> io::Result<()> {
        match framing {
            BodyFraming::None => Ok(()),
            BodyFraming::Fixed(n) => self.copy_exact(writer, n),
            BodyFraming::Chunked => self.copy_chunked(writer),
            BodyFraming::UntilClose => self.copy_until_eof(writer),
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.buf.is_empty() {
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend(chunk[..n].iter().copied());
        }
        Ok(self.buf.pop_front())
    }

    fn copy_exact<W: Write>(&mut self, writer: &mut W, mut remaining: u64) -> io::Result<()> {
        while remaining > 0 {
            if self.buf.is_empty() {
                let mut chunk = [0u8; READ_CHUNK];
                let want = chunk.len().min(remaining as usize);
                let n = self.reader.read(&mut chunk[..want])?;
                if n == 0 {
                    return Err(invalid("peer closed mid-body"));
                }
                writer.write_all(&chunk[..n])?;
                remaining -= n as u64;
            } else {
                let take = (self.buf.len() as u64).min(remaining) as usize;
                let bytes: Vec<u8> = self.buf.drain(..take).collect();
                writer.write_all(&bytes)?;
                remaining -= take as u64;
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            match self.next_byte()? {
                Some(b) => {
                    line.push(b);
                    if line.ends_with(b"\r\n") {
                        return Ok(line);
                    }
                }
                None => return Err(invalid("peer closed mid-chunk-framing")),
            }
        }
    }

    fn copy_chunked<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        loop {
            let size_line = self.read_line()?;
            writer.write_all(&size_line)?;
            let size_str = std::str::from_utf8(&size_line)
                .map_err(|_| invalid("bad chunk size"))?
                .trim_end()
                .split(';')
                .next()
                .unwrap_or("");
            let size = u64::from_str_radix(size_str, 16).map_err(|_| invalid("bad chunk size"))?;
            if size == 0 {
                // Trailers, terminated by an empty line.
                loop {
                    let trailer_line = self.read_line()?;
                    writer.write_all(&trailer_line)?;
                    if trailer_line == b"\r\n" {
                        break;
                    }
                }
                return Ok(());
            }
            self.copy_exact(writer, size)?;
            let crlf = self.read_line()?;
            writer.write_all(&crlf)?;
        }
    }

    fn copy_until_eof<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if !self.buf.is_empty() {
            let bytes: Vec<u8> = self.buf.drain(..).collect();
            writer.write_all(&bytes)?;
        }
        io::copy(&mut self.reader, writer)?;
        Ok(())
    }

    /// Copies whatever is currently buffered plus the rest of the socket
    /// verbatim to `writer`. Used by transparent fall-through and upgrade
    /// passthrough after the tee buffer has already been flushed.
    pub fn copy_remainder<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.copy_until_eof(writer)
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}
