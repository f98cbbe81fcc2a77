//! Transparent fall-through: when a message fails to parse as HTTP/1.x, or
//! an HTTP Upgrade is detected, the pipeline stops trying to understand the
//! connection and becomes a byte-exact relay instead of tearing it down.
//!
//! Both the request and response pipelines hit this same two-step recipe:
//! replay whatever the tee already mirrored, then copy whatever is left on
//! the socket. Shared here so neither pipeline can drift from the other's
//! byte-exactness guarantee.

use crate::tee::TeeBuffer;
use crate::wire::FrameReader;
use std::io::{self, Read, Write};

/// Replays `tee`'s mirrored bytes to `writer`, then copies the rest of
/// `reader`'s socket to it verbatim. Consumes `tee`, since a tee buffer that
/// has fallen through is done being a tee.
pub fn fall_through<R: Read, W: Write>(reader: &mut FrameReader<R>, tee: TeeBuffer, writer: &mut W) -> io::Result<()> {
    let mut replay = tee.into_reader();
    io::copy(&mut replay, writer)?;
    reader.copy_remainder(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replays_mirrored_bytes_then_the_rest_of_the_socket() {
        let mut tee = TeeBuffer::new();
        tee.start();
        tee.mirror(b"not an http re");
        tee.stop();

        let mut fr = FrameReader::new(Cursor::new(b"quest\r\n\r\n".to_vec()));
        let mut out = Vec::new();
        fall_through(&mut fr, tee, &mut out).unwrap();

        assert_eq!(out, b"not an http request\r\n\r\n");
    }
}
