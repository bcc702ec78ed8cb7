//! Error types for DNS and DoH operations

use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while translating between DNS and DoH
#[derive(Debug, Error)]
pub enum Error {
    /// The inbound message could not be understood
    #[error("malformed DNS message: {0}")]
    Malformed(String),

    /// The upstream answered with something unusable, or not at all
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The upstream did not answer within the deadline
    #[error("upstream timed out")]
    Timeout,

    /// Resolver configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// DNS wire codec error
    #[error("protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
