//! Linesock
//!
//! A blocking client socket for line-oriented protocols, over TCP or TLS.
//!
//! The [`Socket`] type owns a single connection at a time. It is configured with connect and
//! read timeouts and a blocking mode, all of which take effect on the next call to
//! [`connect`][ClientSocket::connect]. Once connected, it offers raw writes, `fgets` style
//! line reads, and end-of-stream detection.
//!
//! ```no_run
//! use linesock::{ClientSocket, Socket};
//!
//! let mut socket = Socket::new();
//! assert!(socket.connect("127.0.0.1", 7, false));
//! assert_eq!(socket.write(b"ping\n").unwrap(), Some(5));
//! assert_eq!(socket.read(1024).unwrap().as_deref(), Some(&b"ping\n"[..]));
//! socket.disconnect();
//! ```
//!
//! Connections are opened by a [`Connector`][conn::Connector]. The default,
//! [`StreamConnector`][conn::StreamConnector], understands `tcp://`, `ssl://` and `tls://`
//! address prefixes and delegates TLS to [`rustls`] when the `tls` feature is enabled.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod conn;
pub mod error;
mod socket;
pub mod stream;

pub use self::error::{ConnectError, NotConnected};
pub use self::socket::{ClientSocket, Socket, SocketConfig, DEFAULT_READ_LENGTH};
