//! dovetail-server - the daemon front-ends of the dovetail DNS/DoH bridge
//!
//! Builds on `dovetail-dns` to provide the listening side of the daemon:
//!
//! - the DNS front-end (UDP and TCP), answering stub resolvers via DoH
//! - the HTTPS front-end, answering DoH clients via a classic upstream
//! - the monitoring listener with cache and counter debug endpoints
//! - the TOML configuration all of it is assembled from

pub mod bridge;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod monitor;
pub mod stats;
pub mod tls;

pub use bridge::Bridge;
pub use config::Config;
pub use error::{Error, Result};
pub use stats::Stats;
