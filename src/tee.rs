use bytes::BytesMut;
use std::io::Cursor;

/// Lifecycle state of a [`TeeBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Active,
    Stopped,
}

/// A bounded mirror of recently-read bytes.
///
/// While `Active`, every byte the pipeline reads from its socket is also
/// appended here. If parsing later fails, or an HTTP upgrade is detected,
/// the pipeline replays this buffer to the peer verbatim before copying
/// whatever remains unread on the socket — that's what makes transparent
/// fall-through byte-exact.
#[derive(Debug, Default)]
pub struct TeeBuffer {
    state: State,
    bytes: BytesMut,
}

impl TeeBuffer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            bytes: BytesMut::new(),
        }
    }

    /// Clears any previously mirrored bytes and transitions to `Active`.
    pub fn start(&mut self) {
        self.bytes.clear();
        self.state = State::Active;
    }

    /// Transitions to `Stopped`. Writes after this point are ignored.
    pub fn stop(&mut self) {
        self.state = State::Stopped;
    }

    /// Mirrors `data` into the buffer if the tee is currently `Active`.
    pub fn mirror(&mut self, data: &[u8]) {
        if self.state == State::Active {
            self.bytes.extend_from_slice(data);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// The bytes mirrored since the last [`TeeBuffer::start`], in order.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer's contents as a reader, starting from offset 0,
    /// for replay during transparent fall-through.
    pub fn into_reader(self) -> Cursor<BytesMut> {
        Cursor::new(self.bytes)
    }
}
