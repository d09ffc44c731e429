//! Synchronous forms of the session operations.
//!
//! Every async entry point has a blocking twin here: a [`Session`] owns a
//! private single-threaded runtime and drives the async core to completion
//! on the calling thread. Do not use these inside an async context; block
//! the runtime they would need and they will deadlock it.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

use crate::body::Body;
use crate::error::{Error, Result};
use crate::request::RequestSettings;

/// A blocking session over per-authority connection pools.
#[derive(Clone)]
pub struct Session {
    inner: crate::Session,
    rt: Arc<tokio::runtime::Runtime>,
}

impl Session {
    /// A blocking session with default configuration.
    pub fn new() -> Result<Session> {
        Session::from_async(crate::Session::builder())
    }

    /// Builds a blocking session from an async [`SessionBuilder`]
    /// (`crate::SessionBuilder`).
    pub fn from_async(builder: crate::SessionBuilder) -> Result<Session> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::builder)?;
        Ok(Session {
            inner: builder.build()?,
            rt: Arc::new(rt),
        })
    }

    /// Settings seeded with the session's defaults.
    pub fn settings(&self) -> RequestSettings {
        self.inner.settings()
    }

    /// Issues a request and returns a blocking stream over the response
    /// body. The semantics match [`crate::Session::ropen`] exactly.
    pub fn ropen(
        &self,
        method: Method,
        url: Url,
        body: Body,
        settings: &RequestSettings,
    ) -> Result<ResponseStream> {
        let stream = self
            .rt
            .block_on(self.inner.ropen(method, url, body, settings))?;
        Ok(ResponseStream {
            inner: Some(stream),
            rt: Arc::clone(&self.rt),
        })
    }

    /// The underlying async session, for mixing the two forms.
    pub fn as_async(&self) -> &crate::Session {
        &self.inner
    }
}

/// A blocking single-consumer stream over one response body.
///
/// Holds the connection's read lock like its async counterpart; drop it
/// drained to hand the connection back, drop it early to close the
/// connection.
pub struct ResponseStream {
    inner: Option<crate::ResponseStream>,
    rt: Arc<tokio::runtime::Runtime>,
}

impl ResponseStream {
    fn stream(&self) -> &crate::ResponseStream {
        self.inner.as_ref().expect("stream already consumed")
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.stream().status()
    }

    /// The protocol version of the response.
    pub fn version(&self) -> Version {
        self.stream().version()
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.stream().headers()
    }

    /// The URL that produced this response.
    pub fn url(&self) -> &Url {
        self.stream().url()
    }

    /// The next run of body bytes, or `None` at the end of the body.
    pub fn chunk(&mut self) -> Result<Option<Bytes>> {
        let stream = self.inner.as_mut().expect("stream already consumed");
        self.rt.block_on(stream.chunk())
    }

    /// Reads the remaining body to completion.
    pub fn bytes(mut self) -> Result<Bytes> {
        let stream = self.inner.take().expect("stream already consumed");
        self.rt.block_on(stream.bytes())
    }

    /// Reads the remaining body and interprets it as UTF-8, lossily.
    pub fn text(mut self) -> Result<String> {
        let stream = self.inner.take().expect("stream already consumed");
        self.rt.block_on(stream.text())
    }

    /// Releases the stream without draining it, closing the underlying
    /// connection if the body was not at EOF.
    pub fn close(mut self) {
        if let Some(stream) = self.inner.take() {
            stream.close();
        }
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(stream) => std::fmt::Debug::fmt(stream, f),
            None => f.write_str("ResponseStream(consumed)"),
        }
    }
}
