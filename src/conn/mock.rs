//! A connector and connection backed by memory, suitable for testing socket behavior
//! without touching the network.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Connection, Connector};
use crate::error::ConnectError;

/// Everything a [`MockConnection`] has been asked to do, shared with the test that created it.
#[derive(Debug, Default)]
pub struct MockState {
    /// Bytes written to the connection.
    pub output: Vec<u8>,

    /// The blocking mode most recently applied.
    pub blocking: Option<bool>,

    /// The read timeout most recently applied.
    pub read_timeout: Option<Option<Duration>>,

    /// Whether the connection has been shut down.
    pub shutdown: bool,
}

/// An in-memory connection.
///
/// Reads are served from a fixed input buffer and then report end-of-stream. Everything
/// else is recorded in a [`MockState`] which can be inspected through [`MockConnection::state`].
#[derive(Debug, Default)]
pub struct MockConnection {
    input: Cursor<Vec<u8>>,
    state: Arc<Mutex<MockState>>,
    broken: bool,
}

impl MockConnection {
    /// A connection which will yield `input` to readers.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: Cursor::new(input.to_vec()),
            ..Default::default()
        }
    }

    /// A connection where every read and write fails.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    /// The shared record of this connection's activity.
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        self.state.clone()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("mock state poisoned"))
    }
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        self.input.read(buf)
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.lock()?.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.lock()?.blocking = Some(blocking);
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.lock()?.read_timeout = Some(timeout);
        Ok(())
    }

    fn peer_closed(&mut self) -> io::Result<bool> {
        Ok(self.input.position() >= self.input.get_ref().len() as u64)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.lock()?.shutdown = true;
        Ok(())
    }
}

/// A single recorded call to [`MockConnector::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCall {
    /// The address, including any scheme prefix.
    pub address: String,

    /// The port.
    pub port: u16,

    /// The connect timeout.
    pub timeout: Option<Duration>,
}

type Outcome = Result<MockConnection, ConnectError>;

/// A connector which records every connection attempt.
///
/// Attempts are answered from a queue of outcomes; once it is empty, each attempt succeeds
/// with an empty [`MockConnection`]. Cloned connectors share their calls and their queue.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    calls: Arc<Mutex<Vec<ConnectCall>>>,
    outcomes: Arc<Mutex<VecDeque<Outcome>>>,
    error: Option<ConnectError>,
}

impl MockConnector {
    /// A connector which hands out empty connections unless told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector where every attempt fails with `error`.
    pub fn failing(error: ConnectError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Queue a connection to be returned by a future attempt.
    pub fn push(&self, connection: MockConnection) {
        self.push_outcome(Ok(connection));
    }

    /// Queue an error to be returned by a future attempt.
    pub fn push_error(&self, error: ConnectError) {
        self.push_outcome(Err(error));
    }

    fn push_outcome(&self, outcome: Outcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    /// The attempts made so far.
    pub fn calls(&self) -> Vec<ConnectCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<MockConnection, ConnectError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ConnectCall {
                address: address.into(),
                port,
                timeout,
            });
        }

        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| Ok(MockConnection::default()))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(MockConnection: Connection);
    assert_impl_all!(MockConnector: Connector, Send, Sync, Clone);

    #[test]
    fn records_calls() {
        let connector = MockConnector::new();
        connector
            .connect("ssl://example.test", 443, Some(Duration::from_secs(10)))
            .unwrap();

        assert_eq!(
            connector.calls(),
            vec![ConnectCall {
                address: "ssl://example.test".into(),
                port: 443,
                timeout: Some(Duration::from_secs(10)),
            }]
        );
    }

    #[test]
    fn queued_outcomes_in_order() {
        let connector = MockConnector::new();
        connector.push_error(ConnectError::new(111, "Connection refused"));
        connector.push(MockConnection::with_input(b"second"));

        let error = connector.connect("a", 1, None).unwrap_err();
        assert_eq!(error.code(), 111);

        let mut buf = String::new();
        let mut second = connector.connect("a", 1, None).unwrap();
        second.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "second");

        let mut empty = connector.connect("a", 1, None).unwrap();
        assert!(empty.peer_closed().unwrap());
    }

    #[test]
    fn failing_connector() {
        let connector = MockConnector::failing(ConnectError::new(111, "Connection refused"));
        assert!(connector.connect("a", 1, None).is_err());
        assert!(connector.connect("a", 1, None).is_err());
        assert_eq!(connector.calls().len(), 2);
    }

    #[test]
    fn state_is_shared() {
        let mut connection = MockConnection::default();
        let state = connection.state();

        connection.write_all(b"hello").unwrap();
        connection.set_blocking(false).unwrap();
        connection.shutdown().unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.output, b"hello");
        assert_eq!(state.blocking, Some(false));
        assert!(state.shutdown);
    }
}
