use std::{error::Error as StdError, fmt, io};

use http::StatusCode;
use url::Url;

/// A `Result` alias where the `Err` case is `tether::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur when dispatching a request.
///
/// Note: errors may include the full URL of the request. If the URL contains
/// sensitive information (e.g. an API key as a query parameter), be sure to
/// remove it ([`without_url`](Error::without_url)).
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Invalid input while assembling a request or a client.
    Builder,
    /// Name resolution produced no endpoints, or the pool is empty.
    NotFound,
    /// A timer expired before the operation completed.
    TimedOut,
    /// The operation was cancelled, typically by closing the connection.
    Aborted,
    /// The connection is closed or no longer reusable.
    NotConnected,
    /// `connect` was called on a connection that is already open.
    AlreadyOpen,
    /// An argument failed validation, e.g. an illegal host string.
    InvalidArgument,
    /// The redirect chain exceeded the configured limit.
    TooManyRedirects,
    /// A redirect target is outside the scope this tier may follow.
    /// Carries the redirect status so an outer tier can retry, and the
    /// number of hops this tier already followed in the failing dispatch
    /// so the outer tier can keep the chain-wide limit exact.
    ForbiddenRedirect { status: StatusCode, hops: usize },
    /// A 307/308 redirect required resending a body that cannot be replayed.
    CannotRedirectUnbuffered,
    /// A transport-level I/O failure.
    Io,
    /// A TLS handshake or configuration failure.
    Tls,
    /// The peer sent bytes the response parser could not make sense of.
    Decode,
    /// Reading or producing a request body failed.
    Body,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn not_found() -> Error {
        Error::new(Kind::NotFound, None::<Error>)
    }

    pub(crate) fn timed_out() -> Error {
        Error::new(Kind::TimedOut, None::<Error>)
    }

    pub(crate) fn aborted() -> Error {
        Error::new(Kind::Aborted, None::<Error>)
    }

    pub(crate) fn not_connected() -> Error {
        Error::new(Kind::NotConnected, None::<Error>)
    }

    pub(crate) fn already_open() -> Error {
        Error::new(Kind::AlreadyOpen, None::<Error>)
    }

    pub(crate) fn invalid_argument<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::InvalidArgument, Some(e))
    }

    pub(crate) fn too_many_redirects(url: Url) -> Error {
        Error::new(Kind::TooManyRedirects, None::<Error>).with_url(url)
    }

    pub(crate) fn forbidden_redirect(status: StatusCode, url: Url, hops: usize) -> Error {
        Error::new(Kind::ForbiddenRedirect { status, hops }, None::<Error>).with_url(url)
    }

    pub(crate) fn cannot_redirect_unbuffered(url: Url) -> Error {
        Error::new(Kind::CannotRedirectUnbuffered, None::<Error>).with_url(url)
    }

    /// Wraps a transport error. `io::ErrorKind::TimedOut` is promoted to the
    /// dedicated timeout kind so `is_timeout` keeps working across layers.
    pub(crate) fn io(e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::TimedOut => Error::new(Kind::TimedOut, Some(e)),
            _ => Error::new(Kind::Io, Some(e)),
        }
    }

    pub(crate) fn transport<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Io, Some(e))
    }

    pub(crate) fn tls<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Tls, Some(e))
    }

    pub(crate) fn decode<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Decode, Some(e))
    }

    pub(crate) fn body<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Body, Some(e))
    }
}

impl Error {
    /// Returns a possible URL related to this error.
    ///
    /// For redirect errors this is the *target* of the refused or exhausted
    /// redirect, which lets an outer dispatch tier retry it.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Adds a URL related to this error (overwriting any existing).
    pub fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    /// Strips the related URL from this error, e.g. because it contains
    /// sensitive query parameters.
    pub fn without_url(mut self) -> Self {
        self.inner.url = None;
        self
    }

    /// Returns true if the error came from assembling a request or client.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if resolution or pool lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.inner.kind, Kind::NotFound)
    }

    /// Returns true if the error is related to a timeout.
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::TimedOut) {
            return true;
        }
        let mut source = self.source();
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<io::Error>() {
                if io.kind() == io::ErrorKind::TimedOut {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }

    /// Returns true if the operation was cancelled.
    pub fn is_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::Aborted)
    }

    /// Returns true if the connection was closed or stale when the request
    /// was issued.
    pub fn is_not_connected(&self) -> bool {
        matches!(self.inner.kind, Kind::NotConnected)
    }

    /// Returns true if `connect` was called on an open connection.
    pub fn is_already_open(&self) -> bool {
        matches!(self.inner.kind, Kind::AlreadyOpen)
    }

    /// Returns true if an argument failed validation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidArgument)
    }

    /// Returns true if the redirect chain exceeded its limit.
    pub fn is_too_many_redirects(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRedirects)
    }

    /// Returns true if a redirect target was out of scope for the tier that
    /// refused it.
    pub fn is_forbidden_redirect(&self) -> bool {
        matches!(self.inner.kind, Kind::ForbiddenRedirect { .. })
    }

    /// Returns true if a redirect required replaying a streaming body.
    pub fn is_cannot_redirect_unbuffered(&self) -> bool {
        matches!(self.inner.kind, Kind::CannotRedirectUnbuffered)
    }

    /// Returns true for transport-level I/O failures.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true for TLS failures.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// Returns true if the response could not be parsed.
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode)
    }

    /// Returns true if the request body failed.
    pub fn is_body(&self) -> bool {
        matches!(self.inner.kind, Kind::Body)
    }

    /// The status code of the refused redirect, if this is a
    /// forbidden-redirect error.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::ForbiddenRedirect { status, .. } => Some(status),
            _ => None,
        }
    }

    /// How many redirect hops the refusing tier had already followed in
    /// the dispatch that ended with this forbidden-redirect error. Zero
    /// for every other kind.
    pub(crate) fn redirect_hops(&self) -> usize {
        match self.inner.kind {
            Kind::ForbiddenRedirect { hops, .. } => hops,
            _ => 0,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("tether::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref url) = self.inner.url {
            builder.field("url", url);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Builder => f.write_str("builder error")?,
            Kind::NotFound => f.write_str("no endpoint or connection available")?,
            Kind::TimedOut => f.write_str("operation timed out")?,
            Kind::Aborted => f.write_str("operation aborted")?,
            Kind::NotConnected => f.write_str("connection is not open")?,
            Kind::AlreadyOpen => f.write_str("connection is already open")?,
            Kind::InvalidArgument => f.write_str("invalid argument")?,
            Kind::TooManyRedirects => f.write_str("too many redirects")?,
            Kind::ForbiddenRedirect { status, .. } => {
                write!(f, "redirect ({status}) outside the permitted scope")?
            }
            Kind::CannotRedirectUnbuffered => {
                f.write_str("cannot replay an unbuffered body for a redirect")?
            }
            Kind::Io => f.write_str("transport error")?,
            Kind::Tls => f.write_str("tls error")?,
            Kind::Decode => f.write_str("error decoding response")?,
            Kind::Body => f.write_str("request body error")?,
        }

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}
