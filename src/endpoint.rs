//! Resolved network endpoints.

use std::{fmt, net::SocketAddr};

#[cfg(unix)]
use std::path::PathBuf;

/// A resolved address a transport connection can be opened to.
///
/// Endpoints are what the pool keys its connection multimap by; two
/// connections to the same `Endpoint` share DNS resolution but not sockets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A TCP endpoint, IPv4 or IPv6.
    Tcp(SocketAddr),
    /// A Unix domain socket path.
    #[cfg(unix)]
    Local(PathBuf),
}

impl Endpoint {
    /// The socket address, for TCP endpoints.
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Tcp(addr) => Some(*addr),
            #[cfg(unix)]
            Endpoint::Local(_) => None,
        }
    }

    /// The TCP port, where one exists.
    pub fn port(&self) -> Option<u16> {
        self.addr().map(|a| a.port())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Endpoint {
        Endpoint::Tcp(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => fmt::Display::fmt(addr, f),
            #[cfg(unix)]
            Endpoint::Local(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
