//! The `addr`/`conn` channel protocol bridging a request pipeline's routing
//! decision to whatever dials the outbound connection, plus the half-close
//! contract used for forced connection teardown.

use std::io;
use std::net::{Shutdown as NetShutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, SyncSender};

/// One rendezvous exchange: a resolved destination in, a dialed connection
/// (or failure) out. Both channels are unbuffered (`sync_channel(0)`): the
/// request pipeline's send blocks until the dialer is ready to receive, and
/// the dialer's reply blocks until the pipeline is ready to receive it. This
/// mirrors the underlying protocol's synchronous hand-off; see the design
/// notes for why that rules out tokio for this crate's core loop.
pub fn addr_channel() -> (SyncSender<String>, Receiver<String>) {
    mpsc::sync_channel(0)
}

/// The dialer's reply: either a connection to forward onto, or the reason it
/// couldn't produce one.
pub type DialResult<C> = std::result::Result<C, String>;

pub fn conn_channel<C>() -> (SyncSender<DialResult<C>>, Receiver<DialResult<C>>) {
    mpsc::sync_channel(0)
}

/// Half-close, used when a response pipeline must force a connection closed
/// (e.g. after a HEAD response whose framing can't be trusted) without
/// tearing down the peer's own in-flight writes.
pub trait HalfClose {
    fn shutdown_read(&self) -> io::Result<()>;
    fn shutdown_write(&self) -> io::Result<()>;
}

impl HalfClose for TcpStream {
    fn shutdown_read(&self) -> io::Result<()> {
        self.shutdown(NetShutdown::Read)
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(NetShutdown::Write)
    }
}

#[cfg(unix)]
impl HalfClose for std::os::unix::net::UnixStream {
    fn shutdown_read(&self) -> io::Result<()> {
        self.shutdown(NetShutdown::Read)
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(NetShutdown::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_channel_rendezvous_round_trips() {
        let (tx, rx) = addr_channel();
        let handle = std::thread::spawn(move || tx.send("10.0.0.5:8080".to_string()).unwrap());
        assert_eq!(rx.recv().unwrap(), "10.0.0.5:8080");
        handle.join().unwrap();
    }

    #[test]
    fn conn_channel_carries_dial_failures() {
        let (tx, rx) = conn_channel::<TcpStream>();
        let handle = std::thread::spawn(move || tx.send(Err("connection refused".to_string())).unwrap());
        assert_eq!(rx.recv().unwrap(), Err("connection refused".to_string()));
        handle.join().unwrap();
    }
}
