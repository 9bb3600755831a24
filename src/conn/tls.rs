//! TLS client handshakes over established TCP streams.
//!
//! TLS is provided entirely by [`rustls`]; this module only drives the handshake to completion
//! within the connect timeout and hands the resulting session back as a blocking stream.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::{trace, warn};

use crate::error::ConnectError;

/// Performs TLS client handshakes using a shared [`rustls::ClientConfig`].
#[derive(Debug, Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    /// Create a TLS connector with the given client configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// A TLS connector which trusts the platform's root certificates.
    ///
    /// The certificates are loaded once per process, on first use. Requires that exactly one
    /// of the `tls-ring` or `tls-aws-lc` features is enabled, or that a process-wide
    /// [`rustls::crypto::CryptoProvider`] has been installed.
    pub fn platform() -> Self {
        static PLATFORM: OnceLock<Arc<ClientConfig>> = OnceLock::new();
        Self::new(PLATFORM.get_or_init(|| Arc::new(platform_config())).clone())
    }

    /// Returns a reference to the TLS configuration.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Run a client handshake over `stream`, verifying the server as `domain`.
    ///
    /// The handshake fails once `deadline` passes, however the server paces its messages.
    /// The stream is returned with no read or write timeout set.
    pub fn handshake(
        &self,
        domain: &str,
        mut stream: TcpStream,
        deadline: Option<Instant>,
    ) -> Result<StreamOwned<ClientConnection, TcpStream>, ConnectError> {
        let span = tracing::trace_span!("tls", domain = %domain);
        let _guard = span.enter();

        let server_name = ServerName::try_from(domain.to_owned())
            .map_err(|error| ConnectError::other(format!("invalid tls domain {domain}: {error}")))?;

        let mut conn = ClientConnection::new(self.config.clone(), server_name)
            .map_err(|error| ConnectError::other(format!("tls configuration error: {error}")))?;

        // One socket call per iteration, so the deadline bounds the handshake as a whole.
        loop {
            let writing = conn.wants_write();
            if !writing && !conn.is_handshaking() {
                break;
            }

            let remaining = remaining(deadline)?;
            stream
                .set_read_timeout(remaining)
                .map_err(ConnectError::msg("tls set_read_timeout error"))?;
            stream
                .set_write_timeout(remaining)
                .map_err(ConnectError::msg("tls set_write_timeout error"))?;

            if writing {
                match conn.write_tls(&mut stream) {
                    Ok(_) => {}
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => return Err(ConnectError::msg("tls handshake error")(error)),
                }
                continue;
            }

            match conn.read_tls(&mut stream) {
                Ok(0) => {
                    return Err(ConnectError::msg("tls handshake error")(
                        io::Error::from(io::ErrorKind::UnexpectedEof),
                    ))
                }
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(ConnectError::msg("tls handshake error")(error)),
            }

            if let Err(error) = conn.process_new_packets() {
                // Best effort delivery of the alert rustls queued for the server.
                let _ = conn.write_tls(&mut stream);
                return Err(ConnectError::msg("tls handshake error")(io::Error::new(
                    io::ErrorKind::InvalidData,
                    error,
                )));
            }
        }

        stream
            .set_read_timeout(None)
            .map_err(ConnectError::msg("tls set_read_timeout error"))?;
        stream
            .set_write_timeout(None)
            .map_err(ConnectError::msg("tls set_write_timeout error"))?;

        trace!(
            version = ?conn.protocol_version(),
            alpn = ?conn.alpn_protocol().map(String::from_utf8_lossy),
            "tls handshake complete"
        );

        Ok(StreamOwned::new(conn, stream))
    }
}

/// Time left before `deadline`, or a timeout error once it has passed.
fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>, ConnectError> {
    let Some(deadline) = deadline else {
        return Ok(None);
    };

    match deadline.checked_duration_since(Instant::now()) {
        Some(remaining) if !remaining.is_zero() => Ok(Some(remaining)),
        _ => {
            trace!("tls handshake deadline passed");
            Err(ConnectError::msg("tls handshake error")(io::Error::new(
                io::ErrorKind::TimedOut,
                "handshake timed out",
            )))
        }
    }
}

fn platform_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();

    let result = rustls_native_certs::load_native_certs();
    for error in &result.errors {
        warn!("could not load platform certificate: {}", error);
    }

    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    trace!(added, ignored, "loaded platform root certificates");

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}
