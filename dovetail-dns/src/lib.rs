//! dovetail-dns - the protocol core of the dovetail DNS/DoH bridge
//!
//! This crate holds everything that translates between classic DNS and
//! DNS-over-HTTPS without touching a listening socket:
//!
//! - message helpers over the `hickory-proto` wire codec
//! - the Google-style JSON representation of DNS messages
//! - a bounded, TTL-aware reply cache with single-flight coalescing
//! - the domain override table
//! - upstream clients: classic UDP/TCP DNS and DoH (wire or JSON dialect)
//!
//! The front-ends in `dovetail-server` consume all of this through the
//! [`Resolver`] trait, which is also the seam tests use to inject fake
//! upstreams.

pub mod cache;
pub mod classic;
pub mod error;
pub mod https;
pub mod json;
pub mod message;
pub mod overrides;
pub mod resolver;

pub use cache::{CacheDumpEntry, CacheStats, DnsCache, Fingerprint};
pub use classic::ClassicResolver;
pub use error::{Error, Result};
pub use https::{DohDialect, HttpsResolver};
pub use overrides::{OverrideRule, OverrideTable};
pub use resolver::{CachingResolver, OverrideResolver, Resolver};
