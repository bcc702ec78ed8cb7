//! Daemon configuration
//!
//! The configuration file uses TOML format. Each front-end has its own
//! section and can be enabled independently; at least one must be on.
//!
//! # Example Configuration
//!
//! ```toml
//! [dns]
//! enabled = true
//! listen = "127.0.0.1:53"
//! upstream = "https://dns.google/dns-query"
//! dialect = "wire"
//!
//! [[dns.override]]
//! suffix = "internal.example.com"
//! upstream = "10.0.0.1:53"
//!
//! [https]
//! enabled = true
//! listen = "0.0.0.0:443"
//! upstream = "8.8.8.8:53"
//! cert_file = "/etc/dovetail/cert.pem"
//! key_file = "/etc/dovetail/key.pem"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dovetail_dns::{DnsCache, DohDialect, OverrideRule, OverrideTable};
use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Settings shared by both front-ends
    #[serde(default)]
    pub common: CommonConfig,

    /// DNS-to-HTTPS front-end
    #[serde(default)]
    pub dns: DnsConfig,

    /// HTTPS-to-DNS front-end
    #[serde(default)]
    pub https: HttpsConfig,

    /// Reply cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Monitoring listener
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.dns.enabled && !self.https.enabled {
            return Err(Error::Config(
                "at least one front-end ([dns] or [https]) must be enabled".into(),
            ));
        }
        if self.common.query_timeout_secs == 0 {
            return Err(Error::Config("query_timeout_secs must be positive".into()));
        }
        if self.common.max_inflight == 0 {
            return Err(Error::Config("max_inflight must be positive".into()));
        }

        if self.dns.enabled {
            if self.dns.upstream.is_empty() {
                return Err(Error::Config("[dns] upstream DoH URL is required".into()));
            }
            if !self.dns.upstream.starts_with("https://")
                && !self.dns.upstream.starts_with("http://")
            {
                return Err(Error::Config(format!(
                    "[dns] upstream '{}' is not an http(s) URL",
                    self.dns.upstream
                )));
            }
            self.dns.dialect()?;
            self.dns.override_table()?;
        }

        if self.https.enabled && !self.https.insecure_http {
            if self.https.cert_file.is_none() || self.https.key_file.is_none() {
                return Err(Error::Config(
                    "[https] cert_file and key_file are required unless insecure_http is set"
                        .into(),
                ));
            }
        }

        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Dovetail configuration
#
# Dovetail bridges classic DNS and DNS-over-HTTPS in both directions.
# Enable either front-end independently.

[common]
# Deadline for a single upstream exchange, in seconds.
query_timeout_secs = 4
# Maximum number of requests being handled at once, per front-end.
max_inflight = 1024

# DNS-to-HTTPS: answer classic DNS queries via an upstream DoH endpoint.
[dns]
enabled = true
listen = "127.0.0.1:53"
upstream = "https://dns.google/dns-query"
# "wire" speaks RFC 8484; "json" speaks the Google JSON dialect.
dialect = "wire"

# Zones resolved against a different (classic) upstream, bypassing DoH.
# [[dns.override]]
# suffix = "internal.example.com"
# upstream = "10.0.0.1:53"

# HTTPS-to-DNS: answer DoH requests via an upstream classic resolver.
[https]
enabled = false
listen = "0.0.0.0:443"
upstream = "8.8.8.8:53"
# cert_file = "/etc/dovetail/cert.pem"
# key_file = "/etc/dovetail/key.pem"
# Plain HTTP instead of TLS. For testing only.
# insecure_http = true

[cache]
enabled = true
max_entries = 4096
# Upper bound on how long a reply may be served from cache, in seconds.
ttl_cap_secs = 3600

[monitor]
# Debug/statistics listener. Exposes /debug/dnsserver/cache/dump,
# /debug/dnsserver/cache/flush and /debug/vars. Keep it private.
# listen = "127.0.0.1:8081"
"#
        .to_string()
    }
}

/// Settings shared by both front-ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// Deadline for a single upstream exchange, in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Maximum concurrent in-flight requests per front-end
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

impl CommonConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            max_inflight: default_max_inflight(),
        }
    }
}

/// DNS front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// UDP and TCP listen address
    #[serde(default = "default_dns_listen")]
    pub listen: SocketAddr,

    /// Upstream DoH endpoint URL
    #[serde(default = "default_doh_upstream")]
    pub upstream: String,

    /// Upstream encoding: "wire" (RFC 8484) or "json"
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Suffix-to-upstream override rules
    #[serde(default, rename = "override")]
    pub overrides: Vec<OverrideEntry>,
}

impl DnsConfig {
    pub fn dialect(&self) -> Result<DohDialect> {
        DohDialect::from_str(&self.dialect).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn override_table(&self) -> Result<OverrideTable> {
        let mut rules = Vec::with_capacity(self.overrides.len());
        for entry in &self.overrides {
            let suffix = Name::from_str(&entry.suffix).map_err(|e| {
                Error::Config(format!("invalid override suffix '{}': {e}", entry.suffix))
            })?;
            rules.push(OverrideRule::new(suffix, entry.upstream));
        }
        Ok(OverrideTable::new(rules))
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_dns_listen(),
            upstream: default_doh_upstream(),
            dialect: default_dialect(),
            overrides: Vec::new(),
        }
    }
}

/// One override rule as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    /// Domain suffix, label-aligned (e.g. "internal.example.com")
    pub suffix: String,
    /// Classic DNS server answering for that zone
    pub upstream: SocketAddr,
}

/// HTTPS front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// HTTP(S) listen address
    #[serde(default = "default_https_listen")]
    pub listen: SocketAddr,

    /// Upstream classic DNS server
    #[serde(default = "default_classic_upstream")]
    pub upstream: SocketAddr,

    /// PEM certificate chain
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// PEM private key
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Serve plain HTTP instead of TLS. For testing only.
    #[serde(default)]
    pub insecure_http: bool,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_https_listen(),
            upstream: default_classic_upstream(),
            cert_file: None,
            key_file: None,
            insecure_http: false,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached replies
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Upper bound on entry lifetime, in seconds
    #[serde(default = "default_ttl_cap_secs")]
    pub ttl_cap_secs: u64,
}

impl CacheConfig {
    /// Build the cache this configuration describes, if enabled.
    pub fn build(&self) -> Option<DnsCache> {
        if !self.enabled {
            return None;
        }
        Some(DnsCache::new(
            self.max_entries,
            Duration::from_secs(self.ttl_cap_secs),
        ))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_cap_secs: default_ttl_cap_secs(),
        }
    }
}

/// Monitoring listener configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Listen address for the debug endpoints; disabled when unset
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

fn default_query_timeout_secs() -> u64 {
    4
}

fn default_max_inflight() -> usize {
    1024
}

fn default_dns_listen() -> SocketAddr {
    "127.0.0.1:53".parse().expect("valid default address")
}

fn default_doh_upstream() -> String {
    "https://dns.google/dns-query".into()
}

fn default_dialect() -> String {
    "wire".into()
}

fn default_https_listen() -> SocketAddr {
    "0.0.0.0:443".parse().expect("valid default address")
}

fn default_classic_upstream() -> SocketAddr {
    "8.8.8.8:53".parse().expect("valid default address")
}

fn default_true() -> bool {
    true
}

fn default_cache_entries() -> usize {
    4096
}

fn default_ttl_cap_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses_and_validates() {
        let config = Config::from_toml(&Config::sample()).unwrap();
        assert!(config.dns.enabled);
        assert!(!config.https.enabled);
        assert!(config.cache.enabled);
        assert_eq!(config.dns.dialect().unwrap(), DohDialect::Wire);
    }

    #[test]
    fn rejects_config_with_no_front_end() {
        let err = Config::from_toml("[dns]\nenabled = false\n");
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_http_doh_upstream() {
        let toml = r#"
            [dns]
            enabled = true
            upstream = "dns.google"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unknown_dialect() {
        let toml = r#"
            [dns]
            enabled = true
            upstream = "https://dns.google/dns-query"
            dialect = "xml"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn https_requires_certs_unless_insecure() {
        let toml = r#"
            [https]
            enabled = true
            listen = "127.0.0.1:8443"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));

        let toml = r#"
            [https]
            enabled = true
            listen = "127.0.0.1:8443"
            insecure_http = true
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.https.insecure_http);
    }

    #[test]
    fn override_rules_parse() {
        let toml = r#"
            [dns]
            enabled = true
            upstream = "https://dns.google/dns-query"

            [[dns.override]]
            suffix = "internal.example.com"
            upstream = "10.0.0.1:53"

            [[dns.override]]
            suffix = "corp.example.com"
            upstream = "10.0.0.2:5353"
        "#;
        let config = Config::from_toml(toml).unwrap();
        let table = config.dns.override_table().unwrap();
        assert_eq!(table.len(), 2);

        let name = Name::from_str("db.internal.example.com.").unwrap();
        assert_eq!(table.upstream_for(&name), Some("10.0.0.1:53".parse().unwrap()));
    }

    #[test]
    fn bad_override_suffix_is_rejected() {
        let toml = r#"
            [dns]
            enabled = true
            upstream = "https://dns.google/dns-query"

            [[dns.override]]
            suffix = "..not a name.."
            upstream = "10.0.0.1:53"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn cache_defaults() {
        let config = Config::from_toml("[dns]\nenabled = true\n").unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 4096);
        assert!(config.cache.build().is_some());

        let disabled = Config::from_toml("[dns]\nenabled = true\n[cache]\nenabled = false\n")
            .unwrap();
        assert!(disabled.cache.build().is_none());
    }
}
