//! Resolver composition
//!
//! The front-ends speak to one `Resolver` object; everything behind it is
//! assembled at startup from configuration. `OverrideResolver` routes
//! questions under configured suffixes to alternate classic upstreams, and
//! `CachingResolver` adds the reply cache and single-flight coalescing on
//! top of any inner resolver. Tests inject fakes through the same trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::sync::{broadcast, Mutex};

use crate::cache::{CacheDumpEntry, CacheStats, DnsCache, Fingerprint};
use crate::classic::ClassicResolver;
use crate::error::{Error, Result};
use crate::message;
use crate::overrides::OverrideTable;

/// Anything that can answer a DNS question with a DNS reply.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, request: &Message) -> Result<Message>;
}

/// Routes questions matching an override suffix to that rule's classic
/// upstream; everything else goes to the fallback resolver.
pub struct OverrideResolver {
    table: OverrideTable,
    timeout: Duration,
    fallback: Arc<dyn Resolver>,
}

impl OverrideResolver {
    pub fn new(table: OverrideTable, timeout: Duration, fallback: Arc<dyn Resolver>) -> Self {
        Self {
            table,
            timeout,
            fallback,
        }
    }
}

#[async_trait]
impl Resolver for OverrideResolver {
    async fn resolve(&self, request: &Message) -> Result<Message> {
        if let Some(query) = request.queries().first() {
            if let Some(upstream) = self.table.upstream_for(query.name()) {
                tracing::debug!(name = %query.name(), %upstream, "question matches override rule");
                return ClassicResolver::new(upstream, self.timeout)
                    .resolve(request)
                    .await;
            }
        }
        self.fallback.resolve(request).await
    }
}

/// Reply cache plus single-flight coalescing around an inner resolver.
///
/// Concurrent misses on the same fingerprint collapse onto one upstream
/// call; every waiter receives the leader's reply re-stamped for its own
/// request. With the cache disabled this is a transparent passthrough.
pub struct CachingResolver {
    inner: Arc<dyn Resolver>,
    cache: Option<Mutex<DnsCache>>,
    inflight: Mutex<HashMap<Fingerprint, broadcast::Sender<Option<Message>>>>,
}

enum Flight {
    Leader(broadcast::Sender<Option<Message>>),
    Waiter(broadcast::Receiver<Option<Message>>),
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn Resolver>, cache: Option<DnsCache>) -> Self {
        Self {
            inner,
            cache: cache.map(Mutex::new),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Drop all cached replies, returning how many there were.
    pub async fn flush(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.lock().await.flush(),
            None => 0,
        }
    }

    /// Snapshot the cache contents for the monitoring listener.
    pub async fn dump(&self) -> Vec<CacheDumpEntry> {
        match &self.cache {
            Some(cache) => cache.lock().await.dump(),
            None => Vec::new(),
        }
    }

    /// Current cache counters, if caching is enabled.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.lock().await.stats().clone()),
            None => None,
        }
    }

    async fn resolve_coalesced(
        &self,
        cache: &Mutex<DnsCache>,
        key: Fingerprint,
        request: &Message,
    ) -> Result<Message> {
        // Join an in-flight resolution for this fingerprint, or lead one.
        // Subscribing happens under the same lock the leader must take to
        // publish, so a waiter can never miss the broadcast.
        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(tx) => Flight::Waiter(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx.clone());
                    Flight::Leader(tx)
                }
            }
        };

        match flight {
            Flight::Waiter(mut rx) => match rx.recv().await {
                Ok(Some(mut reply)) => {
                    message::restamp_reply(&mut reply, request, 0);
                    Ok(reply)
                }
                Ok(None) | Err(_) => {
                    Err(Error::Upstream("coalesced upstream query failed".into()))
                }
            },
            Flight::Leader(tx) => {
                let result = self.inner.resolve(request).await;
                if let Ok(reply) = &result {
                    cache.lock().await.insert(request, reply);
                }
                {
                    let mut inflight = self.inflight.lock().await;
                    inflight.remove(&key);
                    let _ = tx.send(result.as_ref().ok().cloned());
                }
                result
            }
        }
    }
}

#[async_trait]
impl Resolver for CachingResolver {
    async fn resolve(&self, request: &Message) -> Result<Message> {
        let Some(cache) = &self.cache else {
            return self.inner.resolve(request).await;
        };
        let Some(key) = Fingerprint::from_message(request) else {
            return self.inner.resolve(request).await;
        };

        if let Some(reply) = cache.lock().await.get(request) {
            tracing::debug!(id = request.id(), "cache hit");
            return Ok(reply);
        }

        self.resolve_coalesced(cache, key, request).await
    }
}
