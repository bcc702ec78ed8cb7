//! Classic DNS upstream client
//!
//! Speaks plain UDP DNS to a configured upstream, retrying over TCP when the
//! upstream truncates. Used by the HTTPS front-end and by override rules.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::message::MAX_WIRE_SIZE;
use crate::resolver::Resolver;

/// Buffer size for UDP replies; matches the payload size we advertise.
const UDP_RECV_SIZE: usize = 4096;

/// DNS client for a single classic (UDP/TCP port 53) upstream.
#[derive(Debug, Clone)]
pub struct ClassicResolver {
    upstream: SocketAddr,
    timeout: Duration,
}

impl ClassicResolver {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    async fn exchange(&self, request: &Message) -> Result<Message> {
        let wire = request.to_vec()?;
        let mut reply = self.exchange_udp(&wire).await?;
        if reply.truncated() {
            tracing::debug!(upstream = %self.upstream, "UDP reply truncated, retrying over TCP");
            reply = self.exchange_tcp(&wire).await?;
        }
        reply.set_id(request.id());
        Ok(reply)
    }

    async fn exchange_udp(&self, wire: &[u8]) -> Result<Message> {
        let bind = match self.upstream.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.send_to(wire, self.upstream).await?;

        let mut buf = vec![0u8; UDP_RECV_SIZE];
        let (len, _) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| Error::Timeout)??;
        Message::from_vec(&buf[..len])
            .map_err(|e| Error::Upstream(format!("invalid UDP reply from {}: {e}", self.upstream)))
    }

    async fn exchange_tcp(&self, wire: &[u8]) -> Result<Message> {
        let mut stream = timeout(self.timeout, TcpStream::connect(self.upstream))
            .await
            .map_err(|_| Error::Timeout)??;

        let mut framed = Vec::with_capacity(2 + wire.len());
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(wire);
        stream.write_all(&framed).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| Error::Timeout)??;
        let reply_len = u16::from_be_bytes(len_buf) as usize;
        if reply_len > MAX_WIRE_SIZE {
            return Err(Error::Upstream(format!(
                "oversized TCP reply from {}",
                self.upstream
            )));
        }

        let mut reply = vec![0u8; reply_len];
        timeout(self.timeout, stream.read_exact(&mut reply))
            .await
            .map_err(|_| Error::Timeout)??;
        Message::from_vec(&reply)
            .map_err(|e| Error::Upstream(format!("invalid TCP reply from {}: {e}", self.upstream)))
    }
}

#[async_trait]
impl Resolver for ClassicResolver {
    async fn resolve(&self, request: &Message) -> Result<Message> {
        self.exchange(request).await
    }
}
