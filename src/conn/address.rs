//! Parsing of `scheme://host` connection targets.

use std::fmt;

use crate::error::ConnectError;

/// The transport selected by the scheme prefix of a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain TCP, selected by no prefix or `tcp://`.
    Tcp,

    /// TCP with a TLS client handshake, selected by `ssl://` or `tls://`.
    Tls,
}

impl Transport {
    /// The canonical scheme prefix for this transport.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tls => "ssl",
        }
    }
}

/// A host to connect to, along with the transport used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    transport: Transport,
    host: String,
    port: u16,
}

impl Target {
    /// Parse a possibly scheme-prefixed host, such as `ssl://example.com`.
    pub fn parse(address: &str, port: u16) -> Result<Self, ConnectError> {
        let (transport, host) = match address.split_once("://") {
            Some((scheme, host)) => (transport_for(scheme)?, host),
            None => (Transport::Tcp, address),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ConnectError::other("missing host"));
        }

        Ok(Self {
            transport,
            host: host.into(),
            port,
        })
    }

    /// The transport selected by the scheme.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The host, without scheme or IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.transport.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.transport.scheme(), self.host, self.port)
        }
    }
}

fn transport_for(scheme: &str) -> Result<Transport, ConnectError> {
    match scheme.to_ascii_lowercase().as_str() {
        "tcp" => Ok(Transport::Tcp),
        "ssl" | "tls" => Ok(Transport::Tls),
        _ => Err(ConnectError::other(format!(
            "unable to find the socket transport \"{scheme}\""
        ))),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn bare_host_is_tcp() {
        let target = Target::parse("example.com", 80).unwrap();
        assert_eq!(target.transport(), Transport::Tcp);
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 80);
    }

    #[test]
    fn secure_schemes() {
        let target = Target::parse("ssl://example.test", 443).unwrap();
        assert_eq!(target.transport(), Transport::Tls);
        assert_eq!(target.host(), "example.test");

        let target = Target::parse("TLS://example.test", 443).unwrap();
        assert_eq!(target.transport(), Transport::Tls);

        let target = Target::parse("tcp://example.test", 25).unwrap();
        assert_eq!(target.transport(), Transport::Tcp);
    }

    #[test]
    fn ipv6_brackets_are_removed() {
        let target = Target::parse("[::1]", 8080).unwrap();
        assert_eq!(target.host(), "::1");
        assert_eq!(target.to_string(), "tcp://[::1]:8080");
    }

    #[test]
    fn unknown_scheme() {
        let error = Target::parse("udp://example.com", 53).unwrap_err();
        assert_eq!(error.code(), ConnectError::UNKNOWN);
        assert_eq!(
            error.message(),
            "unable to find the socket transport \"udp\""
        );
    }

    #[test]
    fn missing_host() {
        assert!(Target::parse("", 80).is_err());
        assert!(Target::parse("ssl://", 443).is_err());
    }
}
