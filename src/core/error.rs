use thiserror::Error;

/// Errors raised by the ring engine and its front-ends.
///
/// FULL, EMPTY, timeouts and conflation are ordinary return values and never
/// appear here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Fatal. The instance is poisoned and every later call fails the same way.
    #[error("corrupted shared state: {0}")]
    CorruptedSharedState(&'static str),
    #[error("layout mismatch: {0}")]
    LayoutMismatch(&'static str),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("ring buffer closed")]
    Closed,
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
