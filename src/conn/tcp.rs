//! TCP connections for client sockets.
//!
//! This module contains the [`TcpConnector`] type, which resolves a host name and opens a
//! blocking [`std::net::TcpStream`] to the first address which accepts the connection. It also
//! contains the [`TcpConfig`] type, which controls the socket options applied before connecting.
//!
//! Normally, you will not need to use this module directly. The default
//! [`StreamConnector`][super::StreamConnector] uses a [`TcpConnector`] for both plain and TLS
//! targets.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::ConnectError;

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// The idle time before TCP keep-alive probes are sent.
    pub keep_alive_timeout: Option<Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Some(Duration::from_secs(90)),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// A TCP connector for client sockets.
///
/// Host names are resolved with the system resolver, and each resolved address is tried in
/// turn until one accepts the connection. The connect timeout is a deadline shared by all
/// of the attempts, not a per-address limit.
///
/// # Example
/// ```no_run
/// # use std::time::Duration;
/// # use linesock::conn::TcpConnector;
/// let connector = TcpConnector::default();
/// let stream = connector
///     .connect("example.com", 80, Some(Duration::from_secs(5)))
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    /// Create a new TCP connector with the given configuration.
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Get the configuration for the TCP connector.
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Mutable access to the configuration for the TCP connector.
    pub fn config_mut(&mut self) -> &mut TcpConfig {
        &mut self.config
    }

    /// Connect to a host and port, giving up once `timeout` has elapsed.
    ///
    /// A `timeout` of `None` waits for as long as the operating system allows.
    /// Name resolution is not covered by the timeout.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<TcpStream, ConnectError> {
        let span = tracing::trace_span!("tcp", host = %host, port = %port);
        let _guard = span.enter();

        let addrs = resolve(host, port)?;
        let deadline = timeout.map(|dur| Instant::now() + dur);

        let mut last_error = None;
        for address in addrs {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => {
                        trace!(timeout = ?timeout, "connection timed out");
                        return Err(ConnectError::msg("tcp connect error")(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "connection attempts timed out",
                        )));
                    }
                },
                None => None,
            };

            match connect(&address, remaining, &self.config) {
                Ok(stream) => {
                    trace!(peer.addr = %address, "tcp connected");
                    return Ok(stream);
                }
                Err(error) => {
                    trace!(peer.addr = %address, %error, "tcp connect attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnectError::other(format!("no addresses resolved for host {host}"))
        }))
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ConnectError> {
    tracing::trace_span!("getaddrinfo").in_scope(|| {
        tracing::trace!("dns resolution starting");
        (host, port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .map_err(|error| {
                ConnectError::other(format!("dns resolution failed for {host}: {error}"))
            })
    })
}

fn bind_local_address(
    socket: &socket2::Socket,
    dst_addr: &SocketAddr,
    local_addr_ipv4: &Option<Ipv4Addr>,
    local_addr_ipv6: &Option<Ipv6Addr>,
) -> io::Result<()> {
    match (*dst_addr, local_addr_ipv4, local_addr_ipv6) {
        (SocketAddr::V4(_), Some(addr), _) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        (SocketAddr::V6(_), _, Some(addr)) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        _ => {}
    }

    Ok(())
}

#[tracing::instrument(skip(connect_timeout, config), level = "debug")]
fn connect(
    addr: &SocketAddr,
    connect_timeout: Option<Duration>,
    config: &TcpConfig,
) -> Result<TcpStream, ConnectError> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(ConnectError::msg("tcp open error"))?;
    tracing::trace!("tcp socket opened");

    let guard = tracing::trace_span!("socket_options").entered();

    if let Some(dur) = config.keep_alive_timeout {
        let conf = TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket.set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    if config.reuse_address {
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("tcp set_reuse_address error: {}", e);
        }
    }

    bind_local_address(
        &socket,
        addr,
        &config.local_address_ipv4,
        &config.local_address_ipv6,
    )
    .map_err(ConnectError::msg("tcp bind local address"))?;

    if let Some(size) = config.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size) {
            warn!("tcp set_buffer_size error: {}", e);
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!("tcp set_recv_buffer_size error: {}", e);
        }
    }

    drop(guard);

    let target: socket2::SockAddr = (*addr).into();
    let connected = match connect_timeout {
        Some(dur) => socket.connect_timeout(&target, dur),
        None => socket.connect(&target),
    };
    connected.map_err(ConnectError::msg("tcp connect error"))?;

    let stream: TcpStream = socket.into();
    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {

    use std::net::TcpListener;

    use super::*;

    #[test]
    fn tcp_connect_localhost() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::default();
        let stream = connector
            .connect("127.0.0.1", port, Some(Duration::from_secs(5)))
            .unwrap();

        let (accepted, _) = listener.accept().unwrap();
        assert_eq!(
            stream.peer_addr().unwrap(),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
        );
        assert_eq!(accepted.peer_addr().unwrap(), stream.local_addr().unwrap());
        assert!(stream.nodelay().unwrap());
    }

    #[test]
    fn tcp_connect_refused() {
        let _ = tracing_subscriber::fmt::try_init();

        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = TcpConnector::default();
        let error = connector
            .connect("127.0.0.1", port, Some(Duration::from_secs(5)))
            .unwrap_err();

        assert_ne!(error.code(), 0);
        assert!(error.message().starts_with("tcp connect error"));
    }

    #[test]
    fn tcp_connect_without_timeout() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new(TcpConfig {
            nodelay: false,
            keep_alive_timeout: None,
            ..Default::default()
        });
        assert!(!connector.config().nodelay);

        let stream = connector.connect("127.0.0.1", port, None).unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn tcp_bind_local_address() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut connector = TcpConnector::default();
        connector.config_mut().local_address_ipv4 = Some(Ipv4Addr::LOCALHOST);

        let stream = connector
            .connect("127.0.0.1", port, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(stream.local_addr().unwrap().ip(), Ipv4Addr::LOCALHOST);
    }
}
