//! TLS plumbing for the HTTPS front-end
//!
//! Certificates come from PEM files named in the configuration; acquisition
//! and renewal are someone else's job. The accept loop terminates TLS per
//! connection and hands the stream to hyper, so the same axum router serves
//! both the TLS and the insecure-HTTP modes.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower_service::Service;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Load a rustls server configuration from PEM certificate and key files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>> {
    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(|e| {
        Error::Tls(format!(
            "unable to open certificate file {}: {e}",
            cert_path.display()
        ))
    })?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| {
            Error::Tls(format!(
                "failed to parse certificates from {}: {e}",
                cert_path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path).map_err(|e| {
        Error::Tls(format!(
            "unable to open private key file {}: {e}",
            key_path.display()
        ))
    })?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| {
            Error::Tls(format!(
                "failed to parse private key from {}: {e}",
                key_path.display()
            ))
        })?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", key_path.display())))?;

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(format!("TLS protocol setup failed: {e}")))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::Tls(format!("invalid certificate or key: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Accept TLS connections and serve `app` on each until shutdown.
pub async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("HTTPS front-end shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "TLS accept error");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = app.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                        app.clone().call(request)
                    });
                    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "connection error");
                    }
                });
            }
        }
    }
}
