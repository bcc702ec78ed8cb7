//! Daemon assembly
//!
//! Builds the resolver chain and front-ends described by a [`Config`] and
//! runs them to completion. Listeners are bound eagerly in [`Bridge::bind`]
//! so that address problems surface before the daemon reports itself up,
//! and so tests can learn the ephemeral ports before sending traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use dovetail_dns::{CachingResolver, HttpsResolver, OverrideResolver};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::dns::DnsServer;
use crate::error::{Error, Result};
use crate::http::HttpServer;
use crate::monitor::MonitorServer;
use crate::stats::Stats;

/// All the listeners of one configured daemon instance.
pub struct Bridge {
    dns: Option<DnsServer>,
    https: Option<HttpServer>,
    monitor: Option<MonitorServer>,
}

impl Bridge {
    /// Bind every enabled front-end. `shutdown` is subscribed once per
    /// listener; sending on it stops them all.
    pub async fn bind(config: &Config, shutdown: &broadcast::Sender<()>) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(Stats::new());

        let mut dns = None;
        let mut caching = None;
        if config.dns.enabled {
            let doh = HttpsResolver::new(
                &config.dns.upstream,
                config.dns.dialect()?,
                config.common.query_timeout(),
            )?;
            let routed = OverrideResolver::new(
                config.dns.override_table()?,
                config.common.query_timeout(),
                Arc::new(doh),
            );
            let resolver = Arc::new(CachingResolver::new(
                Arc::new(routed),
                config.cache.build(),
            ));
            caching = Some(resolver.clone());
            dns = Some(
                DnsServer::bind(
                    config.dns.listen,
                    resolver,
                    stats.clone(),
                    config.common.query_timeout(),
                    config.common.max_inflight,
                    shutdown.subscribe(),
                )
                .await?,
            );
        }

        let https = if config.https.enabled {
            Some(
                HttpServer::bind(
                    &config.https,
                    &config.common,
                    stats.clone(),
                    shutdown.subscribe(),
                )
                .await?,
            )
        } else {
            None
        };

        let monitor = match config.monitor.listen {
            Some(addr) => Some(
                MonitorServer::bind(addr, caching, stats.clone(), shutdown.subscribe()).await?,
            ),
            None => None,
        };

        Ok(Self {
            dns,
            https,
            monitor,
        })
    }

    /// Address of the DNS front-end, when enabled.
    pub fn dns_addr(&self) -> Option<SocketAddr> {
        self.dns.as_ref().and_then(|server| server.local_addr().ok())
    }

    /// Address of the HTTPS front-end, when enabled.
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https
            .as_ref()
            .and_then(|server| server.local_addr().ok())
    }

    /// Address of the monitoring listener, when enabled.
    pub fn monitor_addr(&self) -> Option<SocketAddr> {
        self.monitor
            .as_ref()
            .and_then(|server| server.local_addr().ok())
    }

    /// Run every front-end until shutdown. The first failure wins.
    pub async fn run(self) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        if let Some(dns) = self.dns {
            tasks.spawn(dns.run());
        }
        if let Some(https) = self.https {
            tasks.spawn(https.run());
        }
        if let Some(monitor) = self.monitor {
            tasks.spawn(monitor.run());
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(Error::Internal(format!("front-end task failed: {e}"))),
            }
        }
        Ok(())
    }
}
