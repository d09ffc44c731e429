//! Request bodies.

use std::{fmt, path::PathBuf, pin::Pin};

use bytes::Bytes;
use futures_util::Stream;

use crate::error::BoxError;

pub(crate) type BoxStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + 'static>>;

/// A request body.
///
/// Buffered and file-backed bodies are *restartable*: they can be replayed
/// when a 307/308 redirect requires resending the request. Streaming bodies
/// are consumed by the first send and cause `cannot_redirect_unbuffered` if
/// a redirect needs them again.
pub struct Body {
    inner: Inner,
}

pub(crate) enum Inner {
    Empty,
    Bytes(Bytes),
    File(PathBuf),
    Streaming(BoxStream),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body { inner: Inner::Empty }
    }

    /// A body read from a file at send time.
    ///
    /// The file is opened for every (re)send, so file bodies survive
    /// redirects that require replaying the request.
    pub fn file(path: impl Into<PathBuf>) -> Body {
        Body {
            inner: Inner::File(path.into()),
        }
    }

    /// Wrap a futures `Stream` of chunks in a `Body`.
    ///
    /// The body length is unknown ahead of time, so it is sent with chunked
    /// transfer encoding.
    pub fn wrap_stream<S, B, E>(stream: S) -> Body
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes>,
        E: Into<BoxError>,
    {
        use futures_util::StreamExt;

        Body {
            inner: Inner::Streaming(Box::pin(
                stream.map(|item| item.map(Into::into).map_err(Into::into)),
            )),
        }
    }

    /// Returns a reference to the internal data of the `Body`.
    ///
    /// `None` is returned for file-backed and streaming bodies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.inner {
            Inner::Empty => Some(&[]),
            Inner::Bytes(bytes) => Some(bytes.as_ref()),
            Inner::File(_) | Inner::Streaming(_) => None,
        }
    }

    /// Whether this body can be resent, e.g. across a 307/308 redirect.
    pub fn is_restartable(&self) -> bool {
        !matches!(self.inner, Inner::Streaming(_))
    }

    pub(crate) fn file_path(&self) -> Option<&std::path::Path> {
        match &self.inner {
            Inner::File(path) => Some(path),
            _ => None,
        }
    }

    pub(crate) fn try_clone(&self) -> Option<Body> {
        match &self.inner {
            Inner::Empty => Some(Body::empty()),
            Inner::Bytes(bytes) => Some(Body {
                inner: Inner::Bytes(bytes.clone()),
            }),
            Inner::File(path) => Some(Body::file(path.clone())),
            Inner::Streaming(_) => None,
        }
    }

    pub(crate) fn into_inner(self) -> Inner {
        self.inner
    }
}

impl Default for Body {
    #[inline]
    fn default() -> Body {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    #[inline]
    fn from(bytes: Bytes) -> Body {
        if bytes.is_empty() {
            Body::empty()
        } else {
            Body {
                inner: Inner::Bytes(bytes),
            }
        }
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(vec: Vec<u8>) -> Body {
        Bytes::from(vec).into()
    }
}

impl From<&'static [u8]> for Body {
    #[inline]
    fn from(s: &'static [u8]) -> Body {
        Bytes::from_static(s).into()
    }
}

impl From<String> for Body {
    #[inline]
    fn from(s: String) -> Body {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    #[inline]
    fn from(s: &'static str) -> Body {
        s.as_bytes().into()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body::Empty"),
            Inner::Bytes(b) => f.debug_tuple("Body::Bytes").field(&b.len()).finish(),
            Inner::File(p) => f.debug_tuple("Body::File").field(p).finish(),
            Inner::Streaming(_) => f.write_str("Body::Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_bodies_are_restartable() {
        assert!(Body::empty().is_restartable());
        assert!(Body::from("payload").is_restartable());
        assert!(Body::file("/tmp/upload.bin").is_restartable());

        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("a"), Ok("b")];
        let streaming = Body::wrap_stream(futures_util::stream::iter(chunks));
        assert!(!streaming.is_restartable());
        assert!(streaming.try_clone().is_none());
    }

    #[test]
    fn try_clone_preserves_bytes() {
        let body = Body::from("hello");
        let clone = body.try_clone().unwrap();
        assert_eq!(clone.as_bytes(), Some(&b"hello"[..]));
    }
}
