//! The client socket.
//!
//! A [`Socket`] owns at most one connection at a time. Configuration set on the socket is
//! applied when [`connect`][ClientSocket::connect] is called, and never changes a connection
//! which is already open.
//!
//! ```no_run
//! use linesock::{ClientSocket, Socket};
//!
//! let mut socket = Socket::new();
//! socket.set_connect_timeout(5).set_read_timeout(3);
//!
//! if !socket.connect("example.com", 443, true) {
//!     eprintln!(
//!         "connect failed ({}): {}",
//!         socket.connection_error_no(),
//!         socket.connection_error()
//!     );
//!     return;
//! }
//!
//! socket.write(b"HELLO\r\n").unwrap();
//! while let Some(line) = socket.read(1024).unwrap() {
//!     println!("{}", String::from_utf8_lossy(&line));
//! }
//! socket.disconnect();
//! ```

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::conn::{Connection, Connector, StreamConnector};
use crate::error::{ConnectError, NotConnected};
use crate::stream::Handle;

/// The number of bytes requested by [`ClientSocket::read_line`].
pub const DEFAULT_READ_LENGTH: usize = 1024;

/// Settings applied to each new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// The time allowed to establish a connection. `None` waits for as long as the
    /// operating system allows.
    pub connect_timeout: Option<Duration>,

    /// The time a read may wait for data. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,

    /// Whether reads and writes wait for the connection to become ready.
    pub blocking: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(20)),
            blocking: true,
        }
    }
}

fn timeout_from_secs(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// The operations provided by a client socket.
///
/// Connection failures are reported by [`connect`][ClientSocket::connect] returning `false`,
/// with details available from [`connection_error_no`][ClientSocket::connection_error_no] and
/// [`connection_error`][ClientSocket::connection_error]. Read and write failures are reported
/// as `Ok(None)`. Reading, writing or checking for closure without an open connection is an
/// error, [`NotConnected`].
///
/// A socket is not synchronized: every operation takes `&mut self`, and a socket must not be
/// shared between threads without external locking.
pub trait ClientSocket {
    /// Set the connect timeout, in whole seconds, used by future connections.
    ///
    /// Zero disables the timeout.
    fn set_connect_timeout(&mut self, seconds: u64) -> &mut Self
    where
        Self: Sized;

    /// Set the read timeout, in whole seconds, applied to future connections.
    ///
    /// Zero disables the timeout.
    fn set_read_timeout(&mut self, seconds: u64) -> &mut Self
    where
        Self: Sized;

    /// Set whether future connections block on reads and writes.
    fn set_blocking(&mut self, blocking: bool);

    /// Open a connection to `host` and `port`, over TLS when `secure` is set.
    ///
    /// Any error from a previous attempt is cleared first. A connection which is already open
    /// is closed before the new one is attempted, whether or not the new attempt succeeds.
    ///
    /// Returns `false` if the connection could not be established.
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> bool;

    /// Write `data`, returning the number of bytes written, or `None` if the write failed.
    fn write(&mut self, data: &[u8]) -> Result<Option<usize>, NotConnected>;

    /// Read a line of at most `length - 1` bytes.
    ///
    /// Reading stops after a newline, which is included in the result. Returns `None` at
    /// end-of-stream, on timeout, or on error, when nothing could be read.
    fn read(&mut self, length: usize) -> Result<Option<Bytes>, NotConnected>;

    /// Read a line of at most [`DEFAULT_READ_LENGTH`]` - 1` bytes.
    fn read_line(&mut self) -> Result<Option<Bytes>, NotConnected> {
        self.read(DEFAULT_READ_LENGTH)
    }

    /// Whether the connection has reached end-of-stream.
    fn closed(&mut self) -> Result<bool, NotConnected>;

    /// Close the connection, if one is open.
    fn disconnect(&mut self);

    /// The error number from the last connection attempt, or `0` if it succeeded.
    fn connection_error_no(&self) -> i32;

    /// The error message from the last connection attempt, or `""` if it succeeded.
    fn connection_error(&self) -> &str;
}

/// A client socket, using the connector `C` to open connections.
///
/// The default connector, [`StreamConnector`], opens TCP connections and TLS sessions over
/// them. Any open connection is closed when the socket is dropped.
pub struct Socket<C: Connector = StreamConnector> {
    connector: C,
    config: SocketConfig,
    error: Option<ConnectError>,
    handle: Option<Handle<C::Connection>>,
}

impl<C> fmt::Debug for Socket<C>
where
    C: Connector + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("connector", &self.connector)
            .field("config", &self.config)
            .field("error", &self.error)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Socket {
    /// Create a socket with the default connector and configuration.
    pub fn new() -> Self {
        Self::with_connector(StreamConnector::default())
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Socket<C> {
    /// Create a socket which opens connections with `connector`.
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            config: SocketConfig::default(),
            error: None,
            handle: None,
        }
    }

    /// The settings which will be applied to the next connection.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Mutable access to the settings which will be applied to the next connection.
    pub fn config_mut(&mut self) -> &mut SocketConfig {
        &mut self.config
    }

    /// The connector used to open connections.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether a connection is currently held.
    ///
    /// This does not check whether the peer has closed the connection; see
    /// [`ClientSocket::closed`].
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// The error from the last connection attempt, if it failed.
    pub fn last_error(&self) -> Option<&ConnectError> {
        self.error.as_ref()
    }

    fn handle(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Handle<C::Connection>, NotConnected> {
        self.handle
            .as_mut()
            .ok_or_else(|| NotConnected::new(operation))
    }
}

impl<C: Connector> ClientSocket for Socket<C> {
    fn set_connect_timeout(&mut self, seconds: u64) -> &mut Self {
        self.config.connect_timeout = timeout_from_secs(seconds);
        self
    }

    fn set_read_timeout(&mut self, seconds: u64) -> &mut Self {
        self.config.read_timeout = timeout_from_secs(seconds);
        self
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.config.blocking = blocking;
    }

    fn connect(&mut self, host: &str, port: u16, secure: bool) -> bool {
        self.error = None;

        if self.handle.is_some() {
            debug!("closing previous connection before reconnecting");
            self.disconnect();
        }

        let address: Cow<'_, str> = if secure {
            format!("ssl://{host}").into()
        } else {
            host.into()
        };

        let span = tracing::debug_span!("connect", address = %address, port = %port);
        let _guard = span.enter();

        let connection = match self
            .connector
            .connect(&address, port, self.config.connect_timeout)
        {
            Ok(connection) => connection,
            Err(error) => {
                debug!(code = error.code(), %error, "connection failed");
                self.error = Some(error);
                return false;
            }
        };

        let mut handle = Handle::new(connection);
        let connection = handle.connection_mut();

        if let Err(e) = connection.set_blocking(self.config.blocking) {
            warn!("set_blocking error: {}", e);
        }

        if let Err(e) = connection.set_read_timeout(self.config.read_timeout) {
            warn!("set_read_timeout error: {}", e);
        }

        trace!("connected");
        self.handle = Some(handle);
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<Option<usize>, NotConnected> {
        Ok(self.handle("write")?.write(data))
    }

    fn read(&mut self, length: usize) -> Result<Option<Bytes>, NotConnected> {
        let handle = self.handle("read")?;
        if length < 2 {
            return Ok(Some(Bytes::new()));
        }
        Ok(handle.read_line(length - 1))
    }

    fn closed(&mut self) -> Result<bool, NotConnected> {
        Ok(self.handle("check")?.is_eof())
    }

    fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
            trace!("disconnected");
        }
    }

    fn connection_error_no(&self) -> i32 {
        self.error.as_ref().map_or(0, ConnectError::code)
    }

    fn connection_error(&self) -> &str {
        self.error.as_ref().map_or("", ConnectError::message)
    }
}

impl<C: Connector> Drop for Socket<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
