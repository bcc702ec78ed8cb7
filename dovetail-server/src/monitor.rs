//! Monitoring listener
//!
//! A small plain-HTTP server exposing the cache and the daemon counters for
//! debugging. It binds a separate address from the front-ends and should be
//! kept off public interfaces.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use dovetail_dns::{CacheDumpEntry, CachingResolver};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::error::{Error, Result};
use crate::stats::Stats;

#[derive(Clone)]
struct MonitorState {
    resolver: Option<Arc<CachingResolver>>,
    stats: Arc<Stats>,
}

fn router(state: MonitorState) -> Router {
    Router::new()
        .route("/debug/dnsserver/cache/dump", get(dump_handler))
        .route("/debug/dnsserver/cache/flush", get(flush_handler))
        .route("/debug/vars", get(vars_handler))
        .with_state(state)
}

async fn dump_handler(State(state): State<MonitorState>) -> Json<Vec<CacheDumpEntry>> {
    match &state.resolver {
        Some(resolver) => Json(resolver.dump().await),
        None => Json(Vec::new()),
    }
}

async fn flush_handler(State(state): State<MonitorState>) -> Json<Value> {
    let flushed = match &state.resolver {
        Some(resolver) => resolver.flush().await,
        None => 0,
    };
    Json(json!({ "flushed": flushed }))
}

async fn vars_handler(State(state): State<MonitorState>) -> Json<Value> {
    let cache = match &state.resolver {
        Some(resolver) => resolver.cache_stats().await,
        None => None,
    };
    Json(json!({
        "daemon": state.stats.snapshot(),
        "cache": cache,
    }))
}

/// The monitoring listener.
pub struct MonitorServer {
    listener: TcpListener,
    app: Router,
    shutdown: broadcast::Receiver<()>,
}

impl MonitorServer {
    pub async fn bind(
        addr: SocketAddr,
        resolver: Option<Arc<CachingResolver>>,
        stats: Arc<Stats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let app = router(MonitorState { resolver, stats });
        Ok(Self {
            listener,
            app,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(listen = %self.listener.local_addr()?, "monitoring listener up");
        let mut shutdown = self.shutdown;
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;
        Ok(())
    }
}
