//! Error types for socket operations.
//!
//! Connection failures are not returned as errors by [`Socket::connect`][crate::ClientSocket::connect];
//! they are captured as a [`ConnectError`] and exposed through the socket's error accessors.
//! [`NotConnected`] is returned when an operation needs an open connection and there is none.

use std::io;

use thiserror::Error;

/// The reason the last connection attempt failed.
///
/// Carries the operating system error number when one was reported, along with
/// a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConnectError {
    code: i32,
    message: String,
}

impl ConnectError {
    /// Error code used when the failure did not carry an operating system error number,
    /// such as a DNS failure, a TLS handshake failure or an unknown transport.
    pub const UNKNOWN: i32 = -1;

    /// Create a new connection error from a code and message.
    pub fn new<S>(code: i32, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a connection error with no operating system error number.
    pub fn other<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(Self::UNKNOWN, message)
    }

    /// Build an error from an [`io::Error`], prefixing its message with some context.
    pub(crate) fn msg<S>(context: S) -> impl FnOnce(io::Error) -> Self
    where
        S: Into<String>,
    {
        move |error| Self {
            code: error.raw_os_error().unwrap_or(Self::UNKNOWN),
            message: format!("{}: {}", context.into(), error),
        }
    }

    /// The operating system error number, or [`ConnectError::UNKNOWN`].
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for ConnectError {
    fn from(error: io::Error) -> Self {
        Self {
            code: error.raw_os_error().unwrap_or(Self::UNKNOWN),
            message: error.to_string(),
        }
    }
}

/// An operation was attempted on a socket without an open connection.
///
/// Call [`Socket::connect`][crate::ClientSocket::connect] first, and check that it returned `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation}: socket is not connected")]
pub struct NotConnected {
    operation: &'static str,
}

impl NotConnected {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self { operation }
    }

    /// The name of the operation which was attempted.
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl From<NotConnected> for io::Error {
    fn from(error: NotConnected) -> Self {
        io::Error::new(io::ErrorKind::NotConnected, error)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(ConnectError: std::error::Error, Send, Sync, Clone);
    assert_impl_all!(NotConnected: std::error::Error, Send, Sync, Copy);

    #[test]
    fn connect_error_keeps_os_code() {
        let error = io::Error::from_raw_os_error(111);
        let error = ConnectError::msg("tcp connect error")(error);
        assert_eq!(error.code(), 111);
        assert!(error.message().starts_with("tcp connect error: "));
    }

    #[test]
    fn connect_error_without_os_code() {
        let error = io::Error::new(io::ErrorKind::TimedOut, "connection timed out");
        let error = ConnectError::from(error);
        assert_eq!(error.code(), ConnectError::UNKNOWN);
        assert_eq!(error.message(), "connection timed out");
        assert_eq!(error.to_string(), "connection timed out");
    }

    #[test]
    fn not_connected_names_operation() {
        let error = NotConnected::new("read");
        assert_eq!(error.operation(), "read");
        assert_eq!(error.to_string(), "cannot read: socket is not connected");

        let error: io::Error = error.into();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
    }
}
