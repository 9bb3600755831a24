//! Connection establishment for client sockets.
//!
//! A [`Socket`][crate::Socket] does not open connections itself. It asks a [`Connector`] for a
//! [`Connection`] whenever [`connect`][crate::ClientSocket::connect] is called, and then drives that
//! connection through the small set of capabilities the [`Connection`] trait describes.
//!
//! The default connector is [`StreamConnector`], which understands the same address schemes as
//! a `fsockopen` style API:
//! - `example.com` or `tcp://example.com`: a plain TCP connection.
//! - `ssl://example.com` or `tls://example.com`: a TCP connection followed by a TLS handshake,
//!   verified against the name `example.com`.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;
#[cfg(feature = "tls")]
use std::time::Instant;

pub mod address;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;

pub use self::address::{Target, Transport};
pub use self::tcp::{TcpConfig, TcpConnector};
#[cfg(feature = "tls")]
pub use self::tls::TlsConnector;

use crate::error::ConnectError;
use crate::stream::Stream;

/// The capabilities a socket needs from an open connection.
///
/// Reads and writes go through [`Read`] and [`Write`]; the remaining methods configure the
/// connection and inspect or end its lifecycle.
pub trait Connection: Read + Write + Send + fmt::Debug {
    /// Switch between blocking and non-blocking reads and writes.
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// Set how long a read may wait for data. `None` waits indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Check, without blocking, whether the peer has closed the connection.
    fn peer_closed(&mut self) -> io::Result<bool>;

    /// Close the connection.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens connections on behalf of a socket.
pub trait Connector {
    /// The connection type returned by this connector.
    type Connection: Connection;

    /// Open a connection to `address`, which may carry a scheme prefix such as `ssl://`.
    ///
    /// `timeout` bounds the time spent establishing the connection, including any TLS
    /// handshake. `None` waits for as long as the operating system allows.
    fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self::Connection, ConnectError>;
}

impl<C> Connector for &C
where
    C: Connector + ?Sized,
{
    type Connection = C::Connection;

    fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self::Connection, ConnectError> {
        (**self).connect(address, port, timeout)
    }
}

/// The default connector, which dispatches on the address scheme.
///
/// Plain targets are opened with a [`TcpConnector`]. TLS targets are opened with the same
/// [`TcpConnector`] and then handed to a [`TlsConnector`]; when none was configured, one
/// trusting the platform's root certificates is used.
#[derive(Debug, Clone, Default)]
pub struct StreamConnector {
    tcp: TcpConnector,
    #[cfg(feature = "tls")]
    tls: Option<TlsConnector>,
}

impl StreamConnector {
    /// Create a connector with the given TCP connector and the default TLS configuration.
    pub fn new(tcp: TcpConnector) -> Self {
        Self {
            tcp,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Use a specific TLS connector for `ssl://` and `tls://` targets.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: TlsConnector) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The TCP connector used for all targets.
    pub fn tcp(&self) -> &TcpConnector {
        &self.tcp
    }

    /// Mutable access to the TCP connector used for all targets.
    pub fn tcp_mut(&mut self) -> &mut TcpConnector {
        &mut self.tcp
    }

    #[cfg(feature = "tls")]
    fn connect_tls(
        &self,
        target: &Target,
        timeout: Option<Duration>,
    ) -> Result<Stream, ConnectError> {
        let deadline = timeout.map(|dur| Instant::now() + dur);
        let stream = self.tcp.connect(target.host(), target.port(), timeout)?;

        let tls = match &self.tls {
            Some(tls) => tls.clone(),
            None => TlsConnector::platform(),
        };

        tls.handshake(target.host(), stream, deadline)
            .map(Stream::from)
    }

    #[cfg(not(feature = "tls"))]
    fn connect_tls(
        &self,
        target: &Target,
        _timeout: Option<Duration>,
    ) -> Result<Stream, ConnectError> {
        Err(ConnectError::other(format!(
            "unsupported transport for {target}: TLS support is not enabled"
        )))
    }
}

impl Connector for StreamConnector {
    type Connection = Stream;

    fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Stream, ConnectError> {
        let target = Target::parse(address, port)?;
        match target.transport() {
            Transport::Tcp => self
                .tcp
                .connect(target.host(), target.port(), timeout)
                .map(Stream::from),
            Transport::Tls => self.connect_tls(&target, timeout),
        }
    }
}

#[cfg(test)]
mod tests {

    use std::net::{Ipv4Addr, TcpListener};

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(StreamConnector: Connector, Send, Sync, Clone);

    #[test]
    fn plain_target() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = StreamConnector::default();
        let stream = connector
            .connect("tcp://127.0.0.1", port, Some(Duration::from_secs(5)))
            .unwrap();

        assert!(!stream.is_tls());
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn unknown_transport() {
        let connector = StreamConnector::default();
        let error = connector
            .connect("udp://127.0.0.1", 53, Some(Duration::from_secs(5)))
            .unwrap_err();

        assert_eq!(error.code(), ConnectError::UNKNOWN);
        assert!(error.message().contains("udp"));
    }
}
