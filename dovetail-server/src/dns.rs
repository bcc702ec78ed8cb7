//! DNS front-end
//!
//! Listens for classic DNS queries on UDP and TCP and answers them through
//! the configured resolver chain (cache, overrides, DoH upstream). Each
//! query is handled in its own task; a semaphore bounds how many run at
//! once, and excess UDP load is shed by dropping datagrams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dovetail_dns::message;
use dovetail_dns::Resolver;
use hickory_proto::op::{Message, OpCode, ResponseCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::stats::Stats;

/// Receive buffer for inbound UDP queries.
const UDP_RECV_SIZE: usize = 4096;

/// UDP and TCP DNS listener.
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    query_timeout: Duration,
    limit: Arc<Semaphore>,
    shutdown: broadcast::Receiver<()>,
}

impl DnsServer {
    /// Bind UDP and TCP listeners on `addr`.
    ///
    /// When `addr` uses port 0, the TCP listener is bound to whatever port
    /// the UDP socket received, so both transports share one address.
    pub async fn bind(
        addr: SocketAddr,
        resolver: Arc<dyn Resolver>,
        stats: Arc<Stats>,
        query_timeout: Duration,
        max_inflight: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let udp = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let actual = udp.local_addr()?;
        let tcp = TcpListener::bind(actual)
            .await
            .map_err(|source| Error::Bind { addr: actual, source })?;

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            resolver,
            stats,
            query_timeout,
            limit: Arc::new(Semaphore::new(max_inflight)),
            shutdown,
        })
    }

    /// The address both listeners are bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Serve queries until the shutdown signal fires.
    pub async fn run(mut self) -> Result<()> {
        info!(listen = %self.local_addr()?, "DNS front-end listening");
        let mut buf = vec![0u8; UDP_RECV_SIZE];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("DNS front-end shutting down");
                    return Ok(());
                }

                received = self.udp.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "UDP recv error");
                            continue;
                        }
                    };
                    let Ok(permit) = self.limit.clone().try_acquire_owned() else {
                        self.stats.dns_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        debug!(%src, "shedding UDP query, at capacity");
                        continue;
                    };

                    let wire = buf[..len].to_vec();
                    let socket = self.udp.clone();
                    let resolver = self.resolver.clone();
                    let stats = self.stats.clone();
                    let deadline = self.query_timeout;
                    tokio::spawn(async move {
                        let _permit = permit;
                        handle_udp_query(socket, resolver, stats, deadline, wire, src).await;
                    });
                }

                accepted = self.tcp.accept() => {
                    let (stream, src) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "TCP accept error");
                            continue;
                        }
                    };
                    let Ok(permit) = self.limit.clone().try_acquire_owned() else {
                        self.stats.dns_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        debug!(%src, "refusing TCP connection, at capacity");
                        continue;
                    };

                    let resolver = self.resolver.clone();
                    let stats = self.stats.clone();
                    let deadline = self.query_timeout;
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = handle_tcp_connection(stream, resolver, stats, deadline).await {
                            debug!(%src, error = %e, "TCP connection ended");
                        }
                    });
                }
            }
        }
    }
}

/// Validate a query and run it through the resolver, always producing a
/// reply addressed to the client.
async fn answer_query(
    resolver: &dyn Resolver,
    stats: &Stats,
    deadline: Duration,
    request: &Message,
) -> Message {
    use std::sync::atomic::Ordering;

    stats.dns_queries.fetch_add(1, Ordering::Relaxed);

    if request.op_code() != OpCode::Query {
        return message::reply_with_code(request, ResponseCode::NotImp);
    }
    if request.queries().len() != 1 {
        return message::reply_with_code(request, ResponseCode::FormErr);
    }

    match timeout(deadline, resolver.resolve(request)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!(name = %request.queries()[0].name(), error = %e, "resolution failed");
            stats.dns_servfail.fetch_add(1, Ordering::Relaxed);
            message::reply_with_code(request, ResponseCode::ServFail)
        }
        Err(_) => {
            warn!(name = %request.queries()[0].name(), "resolution timed out");
            stats.dns_servfail.fetch_add(1, Ordering::Relaxed);
            message::reply_with_code(request, ResponseCode::ServFail)
        }
    }
}

async fn handle_udp_query(
    socket: Arc<UdpSocket>,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    deadline: Duration,
    wire: Vec<u8>,
    src: SocketAddr,
) {
    let request = match Message::from_vec(&wire) {
        Ok(request) => request,
        Err(e) => {
            // Nothing sensible to reply with; a header we cannot parse has
            // no usable transaction ID.
            debug!(%src, error = %e, "dropping unparseable UDP query");
            return;
        }
    };

    let reply = answer_query(resolver.as_ref(), &stats, deadline, &request).await;
    let max_size = message::max_udp_payload(&request);
    match message::encode_for_udp(&reply, max_size) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, src).await {
                debug!(%src, error = %e, "failed to send UDP reply");
            }
        }
        Err(e) => warn!(%src, error = %e, "failed to encode UDP reply"),
    }
}

/// Serve a stream of length-prefixed queries on one TCP connection.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    deadline: Duration,
) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            continue;
        }

        let mut wire = vec![0u8; len];
        stream.read_exact(&mut wire).await?;

        let request = match Message::from_vec(&wire) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "closing TCP connection on unparseable query");
                return Ok(());
            }
        };

        let reply = answer_query(resolver.as_ref(), &stats, deadline, &request).await;
        let bytes = reply.to_vec().map_err(dovetail_dns::Error::from)?;

        let mut framed = Vec::with_capacity(2 + bytes.len());
        framed.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(&bytes);
        stream.write_all(&framed).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dovetail_dns::error::Result as DnsResult;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    struct StaticResolver;

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn resolve(&self, request: &Message) -> DnsResult<Message> {
            let mut reply = message::reply_with_code(request, ResponseCode::NoError);
            reply.add_answer(Record::from_rdata(
                request.queries()[0].name().clone(),
                60,
                RData::A(A(Ipv4Addr::new(127, 0, 0, 9))),
            ));
            Ok(reply)
        }
    }

    async fn start_server() -> SocketAddr {
        let (_tx, rx) = broadcast::channel(1);
        // The sender leaks so the server runs for the whole test.
        std::mem::forget(_tx);
        let server = DnsServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(StaticResolver),
            Arc::new(Stats::new()),
            Duration::from_secs(2),
            16,
            rx,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    fn query(name: &str) -> Message {
        message::query_message(Name::from_str(name).unwrap(), RecordType::A, false, false)
    }

    #[tokio::test]
    async fn answers_over_udp() {
        let addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = query("udp.example.");
        request.set_id(0x7777);
        socket.send_to(&request.to_vec().unwrap(), addr).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buf[..len]).unwrap();

        assert_eq!(reply.id(), 0x7777);
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn answers_over_tcp() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = query("tcp.example.");
        let wire = request.to_vec().unwrap();
        let mut framed = Vec::new();
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(&wire);
        stream.write_all(&framed).await.unwrap();

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut reply = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut reply).await.unwrap();

        let reply = Message::from_vec(&reply).unwrap();
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn rejects_multi_question_with_formerr() {
        let addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = query("one.example.");
        request.add_query(hickory_proto::op::Query::query(
            Name::from_str("two.example.").unwrap(),
            RecordType::A,
        ));
        socket.send_to(&request.to_vec().unwrap(), addr).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
    }

    #[tokio::test]
    async fn rejects_non_query_opcode_with_notimp() {
        let addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = query("status.example.");
        request.set_op_code(OpCode::Status);
        socket.send_to(&request.to_vec().unwrap(), addr).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NotImp);
    }
}
