/// TCP reachability connector for a MongoDB replica set member

use super::{ConnectError, Connector};
use crate::config::Endpoint;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

/// Connector that proves the endpoint accepts TCP connections
///
/// Each failure stage maps onto its own `ConnectError`: resolution, socket
/// creation, then connect. This connector never reports `NotPrimary`, since
/// telling a primary from a secondary requires the wire protocol.
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn resolve(&self, endpoint: &Endpoint) -> Result<Vec<SocketAddr>, ConnectError> {
        let target = (endpoint.address.as_str(), endpoint.port);
        let lookup = async {
            tokio::net::lookup_host(target)
                .await
                .map(|addrs| addrs.collect::<Vec<_>>())
        };
        bounded_lookup(lookup, self.connect_timeout, &endpoint.address).await
    }

    fn create_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;
        Ok(TcpSocket::from_std_stream(socket.into()))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError> {
        let socket = Self::create_socket(&addr).map_err(ConnectError::NoSocket)?;

        match timeout(self.connect_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConnectError::ConnectFailed(e)),
            Err(_) => Err(ConnectError::ConnectFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", addr, self.connect_timeout),
            ))),
        }
    }
}

/// Await a name lookup for at most `limit`
async fn bounded_lookup<F>(
    lookup: F,
    limit: Duration,
    host: &str,
) -> Result<Vec<SocketAddr>, ConnectError>
where
    F: Future<Output = io::Result<Vec<SocketAddr>>>,
{
    match timeout(limit, lookup).await {
        Ok(Ok(addrs)) if !addrs.is_empty() => Ok(addrs),
        Ok(Ok(_)) => Err(ConnectError::AddressResolution(format!(
            "{} resolved to no addresses",
            host
        ))),
        Ok(Err(e)) => Err(ConnectError::AddressResolution(e.to_string())),
        Err(_) => Err(ConnectError::AddressResolution(format!(
            "resolving {} timed out after {:?}",
            host, limit
        ))),
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
        log::debug!("Connecting to replica member {}", endpoint);

        let addrs = self.resolve(endpoint).await?;
        let mut last_error = None;
        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                // Out of sockets: trying further addresses cannot help.
                Err(e @ ConnectError::NoSocket(_)) => return Err(e),
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnectError::AddressResolution(format!("{} resolved to no addresses", endpoint))
        }))
    }

    fn describe(&self, connection: &TcpStream) -> String {
        match connection.peer_addr() {
            Ok(addr) => format!("connected to {}", addr),
            Err(e) => format!("connected (peer unknown: {})", e),
        }
    }

    async fn release(&self, mut connection: TcpStream) {
        if let Err(e) = connection.shutdown().await {
            log::debug!("Connection shutdown failed: {}", e);
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
