use thiserror::Error;

/// Failures the engine can report to its caller.
///
/// Expected, non-exceptional control flow (EOF, a detected protocol upgrade)
/// is *not* represented here — see [`crate::wire::ParseOutcome`] — since
/// those are routine exits from the pipeline loop, not errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed routing header: '{0}'")]
    MalformedRouting(String),

    #[error("dialer returned no connection for {0}")]
    NoUpstreamConnection(String),

    #[error("i/o error forwarding bytes: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
