//! Forwarding of unmatched queries to an upstream resolver.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::Name;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::error::DnsError;
use crate::metrics;
use crate::record::ZoneQuery;

/// Largest UDP reply accepted from upstream.
const MAX_UDP_REPLY: usize = 4096;

/// Resolver the pipeline falls back to.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve `query`, returning the upstream reply unchanged.
    async fn resolve(&self, query: &ZoneQuery) -> Result<Message, DnsError>;
}

/// Plain DNS upstream: UDP first, TCP when the UDP reply is truncated.
#[derive(Debug, Clone)]
pub struct DnsUpstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl DnsUpstream {
    /// Create an upstream for `addr` with a per-query timeout.
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Upstream address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn build_query(query: &ZoneQuery, id: u16) -> Message {
        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from(query.name.clone()), query.query_type));
        message
    }

    fn upstream_error(&self, reason: impl Into<String>) -> DnsError {
        DnsError::Upstream {
            addr: self.addr,
            reason: reason.into(),
        }
    }

    async fn query_udp(&self, bytes: &[u8], id: u16) -> Result<Message, DnsError> {
        let bind: SocketAddr = if self.addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.addr).await?;
        socket.send(bytes).await?;

        let mut buf = vec![0u8; MAX_UDP_REPLY];
        loop {
            let len = socket.recv(&mut buf).await?;
            let reply = Message::from_vec(&buf[..len])?;
            if reply.id() == id {
                return Ok(reply);
            }
            trace!(expected = id, got = reply.id(), "discarding stray upstream reply");
        }
    }

    async fn query_tcp(&self, bytes: &[u8], id: u16) -> Result<Message, DnsError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| self.upstream_error("query too large for TCP framing"))?;

        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(bytes).await?;

        let reply_len = stream.read_u16().await?;
        let mut buf = vec![0u8; reply_len as usize];
        stream.read_exact(&mut buf).await?;

        let reply = Message::from_vec(&buf)?;
        if reply.id() != id {
            return Err(self.upstream_error(format!(
                "reply id {} does not match query id {id}",
                reply.id()
            )));
        }
        Ok(reply)
    }

    async fn exchange(&self, query: &ZoneQuery) -> Result<Message, DnsError> {
        let id = rand::random::<u16>();
        let bytes = Self::build_query(query, id).to_vec()?;

        let reply = self.query_udp(&bytes, id).await?;
        if !reply.truncated() {
            return Ok(reply);
        }

        debug!(query = %query, upstream = %self.addr, "truncated reply, retrying over TCP");
        self.query_tcp(&bytes, id).await
    }
}

#[async_trait]
impl Upstream for DnsUpstream {
    async fn resolve(&self, query: &ZoneQuery) -> Result<Message, DnsError> {
        match tokio::time::timeout(self.timeout, self.exchange(query)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                metrics::record_upstream_failure("error");
                Err(e)
            }
            Err(_) => {
                metrics::record_upstream_failure("timeout");
                Err(DnsError::UpstreamTimeout(self.addr))
            }
        }
    }
}
