//! Error types for the daemon front-ends

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Resolver error
    #[error(transparent)]
    Dns(#[from] dovetail_dns::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A front-end task died unexpectedly
    #[error("internal error: {0}")]
    Internal(String),
}
