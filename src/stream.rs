//! Client streams, and the line-buffered handle a socket holds while connected.
//!
//! [`Stream`] is either a plain [`TcpStream`] or a TLS session over one, and implements
//! [`Connection`] so that it can be driven by a [`Socket`][crate::Socket].

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::conn::Connection;

enum Inner {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

/// A connected client stream, either plain TCP or TLS over TCP.
pub struct Stream {
    inner: Inner,
    blocking: bool,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Tcp(stream) => f.debug_tuple("Stream::Tcp").field(stream).finish(),
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => f.debug_tuple("Stream::Tls").field(&stream.sock).finish(),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: Inner::Tcp(stream),
            blocking: true,
        }
    }
}

#[cfg(feature = "tls")]
impl From<rustls::StreamOwned<rustls::ClientConnection, TcpStream>> for Stream {
    fn from(stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>) -> Self {
        Self {
            inner: Inner::Tls(Box::new(stream)),
            blocking: true,
        }
    }
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match &self.inner {
            Inner::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => &stream.sock,
        }
    }

    /// Whether this stream is protected by TLS.
    pub fn is_tls(&self) -> bool {
        !matches!(self.inner, Inner::Tcp(_))
    }

    /// The address of the remote peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// The local address of this stream.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::Tcp(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => stream.flush(),
        }
    }
}

impl Connection for Stream {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.tcp().set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp().set_read_timeout(timeout)
    }

    fn peer_closed(&mut self) -> io::Result<bool> {
        if self.blocking {
            self.tcp().set_nonblocking(true)?;
        }

        let result = match &mut self.inner {
            Inner::Tcp(stream) => tcp_peer_closed(stream),
            #[cfg(feature = "tls")]
            Inner::Tls(stream) => tls_peer_closed(stream),
        };

        if self.blocking {
            self.tcp().set_nonblocking(false)?;
        }

        result
    }

    fn shutdown(&mut self) -> io::Result<()> {
        #[cfg(feature = "tls")]
        if let Inner::Tls(stream) = &mut self.inner {
            let stream = &mut **stream;
            stream.conn.send_close_notify();
            if let Err(error) = stream.conn.complete_io(&mut stream.sock) {
                trace!(%error, "tls close_notify not delivered");
            }
        }

        match self.tcp().shutdown(Shutdown::Both) {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

/// Peek at a non-blocking socket: a zero-length read means the peer sent FIN.
fn tcp_peer_closed(stream: &TcpStream) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    match stream.peek(&mut probe) {
        Ok(0) => Ok(true),
        Ok(_) => Ok(false),
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(error) => Err(error),
    }
}

/// Pull whatever records have arrived on a non-blocking socket into the TLS session.
///
/// The session is closed once the peer's close_notify has been processed, or the socket
/// reached end-of-stream, and no decrypted data is left to read.
#[cfg(feature = "tls")]
fn tls_peer_closed(
    stream: &mut rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
) -> io::Result<bool> {
    let conn = &mut stream.conn;
    let mut tcp_eof = false;

    while conn.wants_read() {
        match conn.read_tls(&mut stream.sock) {
            Ok(0) => {
                tcp_eof = true;
                break;
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }

        conn.process_new_packets()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    }

    let state = conn
        .process_new_packets()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;

    if state.plaintext_bytes_to_read() > 0 {
        return Ok(false);
    }

    Ok(tcp_eof || state.peer_has_closed())
}

/// The exclusively owned, buffered connection held by a connected socket.
///
/// Dropping the handle closes the underlying connection.
pub(crate) struct Handle<C> {
    reader: BufReader<C>,
    eof: bool,
}

impl<C: fmt::Debug> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("connection", self.reader.get_ref())
            .field("buffered", &self.reader.buffer().len())
            .field("eof", &self.eof)
            .finish()
    }
}

impl<C: Connection> Handle<C> {
    pub(crate) fn new(connection: C) -> Self {
        Self {
            reader: BufReader::new(connection),
            eof: false,
        }
    }

    pub(crate) fn connection_mut(&mut self) -> &mut C {
        self.reader.get_mut()
    }

    /// Read a single line of at most `limit` bytes, including the trailing newline.
    ///
    /// Whatever was read before end-of-stream, a timeout, or a would-block condition is
    /// returned. `None` means no bytes were read.
    pub(crate) fn read_line(&mut self, limit: usize) -> Option<Bytes> {
        let mut line = BytesMut::with_capacity(limit.min(8 * 1024));

        while line.len() < limit {
            let available = match self.reader.fill_buf() {
                Ok([]) => {
                    self.eof = true;
                    break;
                }
                Ok(available) => available,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    break;
                }
                Err(error) => {
                    trace!(%error, "read stopped");
                    break;
                }
            };

            let wanted = available.len().min(limit - line.len());
            let (taken, newline) = match available[..wanted].iter().position(|b| *b == b'\n') {
                Some(idx) => (idx + 1, true),
                None => (wanted, false),
            };

            line.extend_from_slice(&available[..taken]);
            self.reader.consume(taken);

            if newline {
                break;
            }
        }

        if line.is_empty() {
            None
        } else {
            Some(line.freeze())
        }
    }

    /// Write as much of `data` as the connection will accept.
    ///
    /// Returns `None` when the connection failed before anything was written.
    pub(crate) fn write(&mut self, data: &[u8]) -> Option<usize> {
        let connection = self.reader.get_mut();
        let mut written = 0;

        while written < data.len() {
            match connection.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    trace!(%error, written, "write failed");
                    if written == 0 {
                        return None;
                    }
                    break;
                }
            }
        }

        if let Err(error) = connection.flush() {
            if error.kind() != io::ErrorKind::WouldBlock {
                trace!(%error, "flush failed");
            }
        }

        Some(written)
    }

    /// Whether the peer has closed the connection and no buffered data remains.
    pub(crate) fn is_eof(&mut self) -> bool {
        if self.eof {
            return true;
        }

        if !self.reader.buffer().is_empty() {
            return false;
        }

        match self.reader.get_mut().peer_closed() {
            Ok(closed) => {
                self.eof = closed;
                closed
            }
            Err(error) => {
                trace!(%error, "liveness check failed");
                true
            }
        }
    }

    pub(crate) fn close(mut self) {
        if let Err(error) = self.reader.get_mut().shutdown() {
            trace!(%error, "shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {

    use crate::conn::mock::MockConnection;

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Stream: Connection, Send);

    #[test]
    fn read_line_stops_at_newline() {
        let mut handle = Handle::new(MockConnection::with_input(b"ping\npong\n"));

        assert_eq!(handle.read_line(1023), Some(Bytes::from_static(b"ping\n")));
        assert_eq!(handle.read_line(1023), Some(Bytes::from_static(b"pong\n")));
        assert_eq!(handle.read_line(1023), None);
        assert!(handle.is_eof());
    }

    #[test]
    fn read_line_respects_limit() {
        let mut handle = Handle::new(MockConnection::with_input(b"abcdefgh\n"));

        assert_eq!(handle.read_line(3), Some(Bytes::from_static(b"abc")));
        assert_eq!(handle.read_line(3), Some(Bytes::from_static(b"def")));
        assert_eq!(handle.read_line(3), Some(Bytes::from_static(b"gh\n")));
    }

    #[test]
    fn read_line_returns_partial_line_at_eof() {
        let mut handle = Handle::new(MockConnection::with_input(b"no newline"));

        assert_eq!(handle.read_line(1023), Some(Bytes::from_static(b"no newline")));
        assert_eq!(handle.read_line(1023), None);
    }

    #[test]
    fn buffered_data_is_not_eof() {
        let mut handle = Handle::new(MockConnection::with_input(b"one\ntwo\n"));

        assert_eq!(handle.read_line(1023), Some(Bytes::from_static(b"one\n")));
        assert!(!handle.is_eof());
    }

    #[test]
    fn write_reports_bytes_written() {
        let connection = MockConnection::default();
        let state = connection.state();
        let mut handle = Handle::new(connection);

        assert_eq!(handle.write(b"ping\n"), Some(5));
        assert_eq!(state.lock().unwrap().output, b"ping\n");
    }

    #[test]
    fn write_failure_is_none() {
        let mut handle = Handle::new(MockConnection::broken());
        assert_eq!(handle.write(b"ping\n"), None);
        assert_eq!(handle.read_line(1023), None);
    }
}
