//! DoH upstream client
//!
//! Sends DNS questions to a DoH endpoint in either the RFC 8484 wire dialect
//! (POST of the serialized message) or the Google JSON dialect (GET with
//! name/type parameters), and turns the response back into a DNS message.
//! The HTTP client honors the standard proxy environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message};
use reqwest::header;

use crate::error::{Error, Result};
use crate::json::{self, DnsJson};
use crate::message::ADVERTISED_UDP_PAYLOAD;
use crate::resolver::Resolver;

/// Media type for RFC 8484 wire-format DoH bodies.
pub const WIRE_CONTENT_TYPE: &str = "application/dns-message";

/// Which encoding to speak with the upstream DoH endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DohDialect {
    /// RFC 8484 wire format (the modern default)
    #[default]
    Wire,
    /// The Google JSON representation
    Json,
}

impl fmt::Display for DohDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DohDialect::Wire => write!(f, "wire"),
            DohDialect::Json => write!(f, "json"),
        }
    }
}

impl FromStr for DohDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wire" | "dns-message" => Ok(DohDialect::Wire),
            "json" => Ok(DohDialect::Json),
            other => Err(Error::Config(format!(
                "unknown DoH dialect '{other}', expected 'wire' or 'json'"
            ))),
        }
    }
}

/// Resolver that answers questions by calling a DoH endpoint.
pub struct HttpsResolver {
    url: String,
    dialect: DohDialect,
    client: reqwest::Client,
}

impl HttpsResolver {
    /// Create a resolver for `url`, speaking `dialect`, with a per-request
    /// deadline of `timeout`.
    pub fn new(url: impl Into<String>, dialect: DohDialect, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(Error::Config(format!("invalid DoH upstream URL '{url}'")));
        }
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            url,
            dialect,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dialect(&self) -> DohDialect {
        self.dialect
    }

    async fn exchange_wire(&self, request: &Message) -> Result<Message> {
        // Advertise a large payload so the upstream does not truncate for us.
        let mut outbound = request.clone();
        if outbound.extensions().is_none() {
            let mut edns = Edns::new();
            edns.set_max_payload(ADVERTISED_UDP_PAYLOAD);
            *outbound.extensions_mut() = Some(edns);
        }

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, WIRE_CONTENT_TYPE)
            .header(header::ACCEPT, WIRE_CONTENT_TYPE)
            .body(outbound.to_vec()?)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "upstream DoH status {}",
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        Message::from_vec(&body)
            .map_err(|e| Error::Upstream(format!("invalid DoH reply body: {e}")))
    }

    async fn exchange_json(&self, request: &Message) -> Result<Message> {
        let query = request
            .queries()
            .first()
            .ok_or_else(|| Error::Malformed("query carries no question".into()))?;
        let dnssec_ok = request
            .extensions()
            .as_ref()
            .map_or(false, |edns| edns.flags().dnssec_ok);

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("name", query.name().to_string()),
                ("type", u16::from(query.query_type()).to_string()),
                ("cd", bool_param(request.checking_disabled())),
                ("do", bool_param(dnssec_ok)),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "upstream DoH status {}",
                response.status()
            )));
        }

        let body: DnsJson = response.json().await.map_err(transport_error)?;
        json::reply_from_json(request, &body)
    }
}

#[async_trait]
impl Resolver for HttpsResolver {
    async fn resolve(&self, request: &Message) -> Result<Message> {
        let mut reply = match self.dialect {
            DohDialect::Wire => self.exchange_wire(request).await?,
            DohDialect::Json => self.exchange_json(request).await?,
        };

        let asked = request
            .queries()
            .first()
            .map(|q| (q.name().to_lowercase(), q.query_type()));
        let answered = reply
            .queries()
            .first()
            .map(|q| (q.name().to_lowercase(), q.query_type()));
        if asked != answered {
            return Err(Error::Upstream(
                "upstream reply question does not match the query".into(),
            ));
        }

        reply.set_id(request.id());
        Ok(reply)
    }
}

fn bool_param(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Upstream(format!("DoH request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_parsing() {
        assert_eq!("wire".parse::<DohDialect>().unwrap(), DohDialect::Wire);
        assert_eq!("JSON".parse::<DohDialect>().unwrap(), DohDialect::Json);
        assert!("xml".parse::<DohDialect>().is_err());
    }

    #[test]
    fn dialect_default_is_wire() {
        assert_eq!(DohDialect::default(), DohDialect::Wire);
    }

    #[test]
    fn rejects_non_http_upstreams() {
        let err = HttpsResolver::new("ftp://example.com", DohDialect::Wire, Duration::from_secs(1));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn accepts_http_for_testing() {
        let resolver = HttpsResolver::new(
            "http://127.0.0.1:8053/dns-query",
            DohDialect::Wire,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(resolver.dialect(), DohDialect::Wire);
    }
}
