//! TLS configuration and the TLS-or-plain stream the connection owns.
//!
//! TLS is BoringSSL throughout, via `boring2` for configuration and
//! `tokio-boring2` for the async handshake. A [`TlsContext`] carries the
//! trust anchors and verification policy for every connection a pool opens;
//! the handshake itself happens inside `Connection::connect` with the
//! connection's host as SNI.

use std::{
    io::{self, IoSlice},
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use boring2::ssl::{SslConnector, SslMethod, SslVerifyMode};
use boring2::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring2::SslStream;

use crate::error::{Error, Result};

#[cfg(unix)]
use tokio::net::UnixStream;

const ALPN_HTTP1: &[u8] = b"\x08http/1.1";

/// Per-pool TLS configuration: trust anchors, verification policy, ALPN.
///
/// Cloning is cheap; the underlying `SslConnector` is reference counted.
#[derive(Clone)]
pub struct TlsContext {
    connector: SslConnector,
    verify: bool,
}

/// Builds a [`TlsContext`].
pub struct TlsContextBuilder {
    ca_file: Option<PathBuf>,
    root_certs_pem: Vec<Vec<u8>>,
    accept_invalid_certs: bool,
}

impl TlsContext {
    /// A context trusting the system's default roots with full verification.
    pub fn new() -> Result<TlsContext> {
        TlsContext::builder().build()
    }

    /// Starts building a context.
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder {
            ca_file: None,
            root_certs_pem: Vec::new(),
            accept_invalid_certs: false,
        }
    }

    /// Performs the client handshake over `stream`, using `host` for SNI
    /// and hostname verification.
    ///
    /// `verify_override` relaxes or enforces certificate verification for
    /// this single handshake, on top of the context's policy.
    pub(crate) async fn handshake(
        &self,
        host: &str,
        stream: TcpStream,
        verify_override: Option<bool>,
    ) -> Result<SslStream<TcpStream>> {
        let verify = verify_override.map(|accept| !accept).unwrap_or(self.verify);

        let mut cfg = self.connector.configure().map_err(Error::tls)?;
        cfg.set_use_server_name_indication(true);
        cfg.set_verify_hostname(verify);
        if !verify {
            cfg.set_verify(SslVerifyMode::NONE);
        }

        tokio_boring2::connect(cfg, host, stream)
            .await
            .map_err(|e| Error::tls(e.to_string()))
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("verify", &self.verify)
            .finish()
    }
}

impl TlsContextBuilder {
    /// Trust the PEM bundle at `path` instead of only the system roots.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Adds a PEM-encoded root certificate to the trust store.
    pub fn add_root_certificate_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_certs_pem.push(pem.into());
        self
    }

    /// Disables certificate and hostname verification.
    ///
    /// Intended for test rigs and debugging; a connection made this way is
    /// open to man-in-the-middle interception.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Builds the context.
    pub fn build(self) -> Result<TlsContext> {
        let mut builder =
            SslConnector::builder(SslMethod::tls_client()).map_err(Error::tls)?;

        builder.set_alpn_protos(ALPN_HTTP1).map_err(Error::tls)?;

        if let Some(path) = self.ca_file {
            builder.set_ca_file(&path).map_err(Error::tls)?;
        }
        for pem in self.root_certs_pem {
            let cert = X509::from_pem(&pem).map_err(Error::tls)?;
            builder
                .cert_store_mut()
                .add_cert(cert)
                .map_err(Error::tls)?;
        }

        if self.accept_invalid_certs {
            builder.set_verify(SslVerifyMode::NONE);
        } else {
            builder.set_verify(SslVerifyMode::PEER);
        }

        Ok(TlsContext {
            connector: builder.build(),
            verify: !self.accept_invalid_certs,
        })
    }
}

/// The byte stream a connection owns: plain TCP, TLS over TCP, or a local
/// socket.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            MaybeTlsStream::Plain(s) => s.is_write_vectored(),
            MaybeTlsStream::Tls(s) => s.is_write_vectored(),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
