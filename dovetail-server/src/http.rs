//! HTTPS front-end
//!
//! Serves DoH requests and resolves them against the configured classic DNS
//! upstream. Two endpoints are mounted: `/dns-query` speaks the RFC 8484
//! wire format (GET with a `dns=` parameter or POST of the raw message) and
//! `/resolve` speaks the Google JSON dialect. A DNS-level failure such as
//! NXDOMAIN is still HTTP 200; HTTP error codes are reserved for requests
//! the daemon could not process.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{BoxError, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dovetail_dns::https::WIRE_CONTENT_TYPE;
use dovetail_dns::{json, message, ClassicResolver, Resolver};
use hickory_proto::op::{Message, OpCode};
use hickory_proto::rr::Name;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tracing::info;

use crate::config::{CommonConfig, HttpsConfig};
use crate::error::{Error, Result};
use crate::stats::Stats;
use crate::tls;

/// Content type the JSON dialect is served with.
pub const JSON_CONTENT_TYPE: &str = "application/x-javascript";

/// Shared state for the DoH handlers.
#[derive(Clone)]
pub struct HttpState {
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    query_timeout: Duration,
}

impl HttpState {
    pub fn new(resolver: Arc<dyn Resolver>, stats: Arc<Stats>, query_timeout: Duration) -> Self {
        Self {
            resolver,
            stats,
            query_timeout,
        }
    }
}

/// Build the DoH router. Load is shed with 503 once `max_inflight`
/// requests are being processed.
pub fn router(state: HttpState, max_inflight: usize) -> Router {
    Router::new()
        .route("/dns-query", get(wire_get).post(wire_post))
        .route("/resolve", get(json_get))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::SERVICE_UNAVAILABLE
                }))
                .load_shed()
                .concurrency_limit(max_inflight),
        )
        .with_state(state)
}

/// An HTTP-level rejection carrying the status it should be served with.
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn from_resolver(error: &dovetail_dns::Error) -> Self {
        use dovetail_dns::Error as DnsError;
        let status = match error {
            DnsError::Malformed(_) => StatusCode::BAD_REQUEST,
            DnsError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DnsError::Upstream(_) | DnsError::Io(_) | DnsError::Proto(_) => {
                StatusCode::BAD_GATEWAY
            }
            DnsError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

fn reject(stats: &Stats, error: HttpError) -> Response {
    stats.http_errors.fetch_add(1, Ordering::Relaxed);
    error.into_response()
}

#[derive(Deserialize)]
struct WireParams {
    dns: Option<String>,
}

/// GET /dns-query?dns=<base64url>
async fn wire_get(State(state): State<HttpState>, Query(params): Query<WireParams>) -> Response {
    state.stats.http_requests.fetch_add(1, Ordering::Relaxed);

    let Some(encoded) = params.dns else {
        return reject(&state.stats, HttpError::bad_request("missing dns query parameter"));
    };
    let wire = match URL_SAFE_NO_PAD.decode(encoded.as_bytes()) {
        Ok(wire) => wire,
        Err(_) => {
            return reject(
                &state.stats,
                HttpError::bad_request("invalid base64url in dns parameter"),
            )
        }
    };
    answer_wire(&state, wire).await
}

/// POST /dns-query  (Content-Type: application/dns-message)
async fn wire_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.stats.http_requests.fetch_add(1, Ordering::Relaxed);

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if content_type != WIRE_CONTENT_TYPE {
        return reject(
            &state.stats,
            HttpError {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                message: format!("expected {WIRE_CONTENT_TYPE}"),
            },
        );
    }
    if body.len() > message::MAX_WIRE_SIZE {
        return reject(&state.stats, HttpError::bad_request("DNS message too large"));
    }
    answer_wire(&state, body.to_vec()).await
}

async fn answer_wire(state: &HttpState, wire: Vec<u8>) -> Response {
    let request = match Message::from_vec(&wire) {
        Ok(request) => request,
        Err(e) => {
            return reject(
                &state.stats,
                HttpError::bad_request(format!("body is not a DNS message: {e}")),
            )
        }
    };

    let reply = match resolve_checked(state, &request).await {
        Ok(reply) => reply,
        Err(error) => return reject(&state.stats, error),
    };
    match reply.to_vec() {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, WIRE_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => reject(
            &state.stats,
            HttpError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("failed to encode reply: {e}"),
            },
        ),
    }
}

#[derive(Deserialize)]
struct ResolveParams {
    name: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    cd: Option<String>,
    #[serde(rename = "do")]
    dnssec_ok: Option<String>,
    edns_client_subnet: Option<String>,
}

/// GET /resolve?name=<domain>&type=<t>&cd=<bool>&do=<bool>
async fn json_get(State(state): State<HttpState>, Query(params): Query<ResolveParams>) -> Response {
    state.stats.http_requests.fetch_add(1, Ordering::Relaxed);

    let (request, client_subnet) = match json_request(&params) {
        Ok(parsed) => parsed,
        Err(error) => return reject(&state.stats, error),
    };
    let reply = match resolve_checked(&state, &request).await {
        Ok(reply) => reply,
        Err(error) => return reject(&state.stats, error),
    };

    let json = json::message_to_json(&reply, client_subnet);
    match serde_json::to_string(&json) {
        Ok(body) => ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response(),
        Err(e) => reject(
            &state.stats,
            HttpError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("failed to encode reply: {e}"),
            },
        ),
    }
}

fn json_request(
    params: &ResolveParams,
) -> std::result::Result<(Message, Option<String>), HttpError> {
    let Some(name) = params.name.as_deref() else {
        return Err(HttpError::bad_request("missing name parameter"));
    };
    let mut name: Name = name
        .parse()
        .map_err(|e| HttpError::bad_request(format!("invalid name: {e}")))?;
    name.set_fqdn(true);

    let rtype = json::parse_record_type(params.record_type.as_deref().unwrap_or(""))
        .map_err(|e| HttpError::bad_request(e.to_string()))?;
    let cd = json::parse_bool_param(params.cd.as_deref().unwrap_or(""))
        .map_err(|e| HttpError::bad_request(e.to_string()))?;
    let dnssec_ok = json::parse_bool_param(params.dnssec_ok.as_deref().unwrap_or(""))
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    Ok((
        message::query_message(name, rtype, cd, dnssec_ok),
        params.edns_client_subnet.clone(),
    ))
}

/// Enforce the one-question rule and run the resolver with the deadline.
async fn resolve_checked(
    state: &HttpState,
    request: &Message,
) -> std::result::Result<Message, HttpError> {
    if request.queries().len() != 1 {
        return Err(HttpError::bad_request("exactly one question is required"));
    }
    if request.op_code() != OpCode::Query {
        return Err(HttpError::bad_request("only the QUERY opcode is supported"));
    }

    match timeout(state.query_timeout, state.resolver.resolve(request)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(HttpError::from_resolver(&e)),
        Err(_) => Err(HttpError {
            status: StatusCode::GATEWAY_TIMEOUT,
            message: "upstream timed out".into(),
        }),
    }
}

/// The HTTPS front-end listener.
pub struct HttpServer {
    listener: TcpListener,
    app: Router,
    tls: Option<Arc<rustls::ServerConfig>>,
    shutdown: broadcast::Receiver<()>,
}

impl HttpServer {
    /// Bind the listener and set up TLS unless `insecure_http` is on.
    pub async fn bind(
        config: &HttpsConfig,
        common: &CommonConfig,
        stats: Arc<Stats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let resolver: Arc<dyn Resolver> = Arc::new(ClassicResolver::new(
            config.upstream,
            common.query_timeout(),
        ));
        let state = HttpState::new(resolver, stats, common.query_timeout());
        let app = router(state, common.max_inflight);

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen,
                source,
            })?;

        let tls = if config.insecure_http {
            None
        } else {
            // validate() guarantees both paths are present here
            let cert = config.cert_file.as_deref().ok_or_else(|| {
                Error::Config("cert_file is required unless insecure_http is set".into())
            })?;
            let key = config.key_file.as_deref().ok_or_else(|| {
                Error::Config("key_file is required unless insecure_http is set".into())
            })?;
            Some(tls::load_server_config(cert, key)?)
        };

        Ok(Self {
            listener,
            app,
            tls,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the shutdown signal fires.
    pub async fn run(self) -> Result<()> {
        let addr = self.listener.local_addr()?;
        match self.tls {
            None => {
                info!(listen = %addr, "HTTPS front-end listening (insecure HTTP mode)");
                let mut shutdown = self.shutdown;
                axum::serve(self.listener, self.app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        info!("HTTPS front-end shutting down");
                    })
                    .await?;
                Ok(())
            }
            Some(tls_config) => {
                info!(listen = %addr, "HTTPS front-end listening");
                tls::serve(
                    self.listener,
                    TlsAcceptor::from(tls_config),
                    self.app,
                    self.shutdown,
                )
                .await
            }
        }
    }
}
