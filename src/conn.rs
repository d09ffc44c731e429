//! A single HTTP/1.1 connection.
//!
//! A [`Connection`] owns one byte stream to one endpoint and multiplexes
//! requests over it strictly sequentially: dispatch acquires the write lock
//! to send and the read lock to receive, and the returned
//! [`ResponseStream`] keeps holding the read lock until the body has been
//! consumed. Pipelining is not attempted — a second request cannot start
//! its send until the previous response has been fully delivered.
//!
//! Connections are shared behind `Arc` by the pool and by in-flight
//! dispatchers; the atomic in-flight counter is the only state observable
//! without a lock and is what the pool's idle detection keys on.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::SystemTime,
};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version};
use log::{debug, trace};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::{Body, Inner as BodyInner};
use crate::codec::{self, BodyDecoder, BodyKind, Decoded, ResponseHead};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::keep_alive::KeepAlive;
use crate::redirect::{self, RedirectMode};
use crate::request::RequestSettings;
use crate::tls::{MaybeTlsStream, TlsContext};

/// `User-Agent` injected when the caller supplies none.
pub(crate) const DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const FILE_CHUNK: usize = 16 * 1024;

struct ReadState {
    io: Option<ReadHalf<MaybeTlsStream>>,
    buf: BytesMut,
}

struct WriteState {
    io: Option<WriteHalf<MaybeTlsStream>>,
}

struct Shared {
    host: String,
    endpoint: Option<Endpoint>,
    keep_alive: KeepAlive,
    token: CancellationToken,
}

/// A persistent, possibly TLS-secured connection to one endpoint.
pub struct Connection {
    tls: Option<TlsContext>,
    read: Arc<AsyncMutex<ReadState>>,
    write: AsyncMutex<WriteState>,
    shared: StdMutex<Shared>,
    ongoing_requests: AtomicUsize,
    open: std::sync::atomic::AtomicBool,
}

impl Connection {
    /// The widest redirect scope a bare connection can follow by itself.
    pub const SUPPORTED_REDIRECT_MODE: RedirectMode = RedirectMode::SameEndpoint;

    /// Creates a plain-TCP connection in the closed state.
    pub fn new() -> Connection {
        Connection::build(None)
    }

    /// Creates a TLS connection in the closed state. The handshake happens
    /// at [`connect`](Connection::connect), with the host as SNI.
    pub fn with_tls(tls: TlsContext) -> Connection {
        Connection::build(Some(tls))
    }

    fn build(tls: Option<TlsContext>) -> Connection {
        Connection {
            tls,
            read: Arc::new(AsyncMutex::new(ReadState {
                io: None,
                buf: BytesMut::new(),
            })),
            write: AsyncMutex::new(WriteState { io: None }),
            shared: StdMutex::new(Shared {
                host: String::new(),
                endpoint: None,
                keep_alive: KeepAlive::unlimited(),
                token: CancellationToken::new(),
            }),
            ongoing_requests: AtomicUsize::new(0),
            open: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Whether the transport is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The number of requests currently holding a live response stream.
    pub fn working_requests(&self) -> usize {
        self.ongoing_requests.load(Ordering::SeqCst)
    }

    /// The host used for SNI and the `Host` header.
    pub fn host(&self) -> String {
        self.lock_shared().host.clone()
    }

    /// The endpoint of the last successful connect.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lock_shared().endpoint.clone()
    }

    /// The keep-alive deadline, `None` while unbounded.
    pub fn timeout(&self) -> Option<SystemTime> {
        self.lock_shared().keep_alive.deadline()
    }

    /// The full keep-alive record computed from the last response.
    pub fn keep_alive(&self) -> KeepAlive {
        self.lock_shared().keep_alive
    }

    /// Reserves capacity in the response parse buffer. Takes effect when no
    /// response is being received.
    pub fn reserve(&self, additional: usize) {
        if let Ok(mut read) = self.read.try_lock() {
            read.buf.reserve(additional);
        }
    }

    /// Sets the host used for TLS SNI and the `Host` header.
    ///
    /// Must be called before `connect`; changing the identity of an open
    /// connection is an error.
    pub fn set_host(&self, host: &str) -> Result<()> {
        if self.is_open() {
            return Err(Error::invalid_argument(
                "set_host called on an open connection",
            ));
        }
        if host.parse::<std::net::IpAddr>().is_err() {
            url::Host::parse(host).map_err(Error::invalid_argument)?;
        }
        self.lock_shared().host = host.to_owned();
        Ok(())
    }

    /// Opens the transport to `endpoint`, performing the TLS handshake when
    /// this connection carries a TLS context.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.connect_with(endpoint, None).await
    }

    /// `connect` with a per-call certificate verification override.
    pub(crate) async fn connect_with(
        &self,
        endpoint: &Endpoint,
        verify_override: Option<bool>,
    ) -> Result<()> {
        if self.is_open() {
            return Err(Error::already_open());
        }
        // Both halves must be free; a held lock means a previous life of
        // this connection still has a stream in flight.
        let mut write = self.write.try_lock().map_err(|_| Error::already_open())?;
        let mut read = self.read.try_lock().map_err(|_| Error::already_open())?;

        let host = self.host();
        debug!("connecting to {endpoint}");

        let stream = match endpoint {
            Endpoint::Tcp(addr) => {
                let tcp = TcpStream::connect(addr).await.map_err(Error::io)?;
                let _ = tcp.set_nodelay(true);
                match &self.tls {
                    Some(ctx) => {
                        if host.is_empty() {
                            return Err(Error::invalid_argument(
                                "host must be set before a TLS connect",
                            ));
                        }
                        let tls = ctx.handshake(&host, tcp, verify_override).await?;
                        MaybeTlsStream::Tls(Box::new(tls))
                    }
                    None => MaybeTlsStream::Plain(tcp),
                }
            }
            #[cfg(unix)]
            Endpoint::Local(path) => {
                if self.tls.is_some() {
                    return Err(Error::invalid_argument(
                        "tls over local sockets is not supported",
                    ));
                }
                let unix = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(Error::io)?;
                MaybeTlsStream::Unix(unix)
            }
        };

        let (r, w) = split(stream);
        read.io = Some(r);
        read.buf.clear();
        write.io = Some(w);

        {
            let mut shared = self.lock_shared();
            shared.endpoint = Some(endpoint.clone());
            shared.keep_alive = KeepAlive::unlimited();
            shared.token = CancellationToken::new();
        }
        self.open.store(true, Ordering::SeqCst);
        trace!("connected to {endpoint}");
        Ok(())
    }

    /// Shuts the transport down.
    ///
    /// In-flight requests complete with an aborted error; the scoped locks
    /// they hold are released as their futures unwind.
    pub async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.token().cancel();

        let mut write = self.write.lock().await;
        if let Some(mut io) = write.io.take() {
            let _ = io.shutdown().await;
        }
        drop(write);

        // The read half may still be pinned by a live response stream; it
        // drops the half itself when it observes the cancellation.
        if let Ok(mut read) = self.read.try_lock() {
            read.io = None;
            read.buf = BytesMut::new();
        }
        trace!("connection closed");
        Ok(())
    }

    /// Synchronous, best-effort form of [`close`](Connection::close).
    pub fn close_now(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.token().cancel();
        if let Ok(mut write) = self.write.try_lock() {
            write.io = None;
        }
        if let Ok(mut read) = self.read.try_lock() {
            read.io = None;
            read.buf = BytesMut::new();
        }
    }

    /// Issues a request and returns a stream over the response body.
    ///
    /// The target's path and query are sent in origin-form; `Host`,
    /// `User-Agent` and `Connection` are injected when the settings do not
    /// carry them. Redirects whose target stays on this connection's
    /// endpoint are followed up to the configured limit; anything wider
    /// fails with a forbidden-redirect error carrying the target URL and
    /// the hops already followed, so the pool or session can retry it
    /// without losing count.
    pub async fn ropen(
        self: &Arc<Self>,
        method: Method,
        url: &Url,
        body: Body,
        settings: &RequestSettings,
    ) -> Result<ResponseStream> {
        match settings.options.timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.ropen_inner(method, url, body, settings))
                    .await
                {
                    Ok(res) => res,
                    // Dropping the dispatch future mid-request has already
                    // closed the connection via its guards.
                    Err(_) => Err(Error::timed_out()),
                }
            }
            None => self.ropen_inner(method, url, body, settings).await,
        }
    }

    async fn ropen_inner(
        self: &Arc<Self>,
        method: Method,
        url: &Url,
        body: Body,
        settings: &RequestSettings,
    ) -> Result<ResponseStream> {
        let mut url = url.clone();
        let mut method = method;
        let mut body = Some(body);
        let mut hops = 0usize;
        // A bare connection can only satisfy same-endpoint hops, whatever
        // the request asked for.
        let mode = settings.options.redirect.min(Self::SUPPORTED_REDIRECT_MODE);

        loop {
            let token = self.token();

            // Whole round trips are serialized: the sender needs both locks
            // before the first byte leaves, and the read lock is not
            // released until the previous response has been consumed.
            let mut write = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::aborted()),
                guard = self.write.lock() => guard,
            };
            let mut read = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::aborted()),
                guard = Arc::clone(&self.read).lock_owned() => guard,
            };

            {
                let shared = self.lock_shared();
                if !self.is_open() || !shared.keep_alive.usable_at(SystemTime::now()) {
                    return Err(Error::not_connected());
                }
            }

            let replay = body.as_ref().and_then(Body::try_clone);
            let current = body.take().unwrap_or_default();
            let headers = self.prepare_headers(&url, &method, &current, settings).await?;

            let mut head_buf = BytesMut::new();
            codec::write_head(&mut head_buf, &method, &origin_form(&url), &headers);
            trace!("sending {} {}", method, url);

            let mut guard = DispatchGuard::new(Arc::clone(self));
            // The keep-alive budget is charged only for requests that
            // actually reach the wire.
            self.lock_shared().keep_alive.register_use();
            guard.closing = true;

            {
                let io = write.io.as_mut().ok_or_else(Error::not_connected)?;
                write_abortable(io, &head_buf, &token).await?;
                send_body(io, current.into_inner(), &token).await?;
                io.flush().await.map_err(Error::io)?;
            }
            drop(write);

            self.ongoing_requests.fetch_add(1, Ordering::SeqCst);
            guard.counted = true;

            let head = loop {
                if let Some(head) = codec::parse_head(&mut read.buf)? {
                    break head;
                }
                let io = read.io.as_mut().ok_or_else(Error::not_connected)?;
                let n = read_abortable(io, &mut read.buf, &token).await?;
                if n == 0 {
                    return Err(Error::decode("connection closed before response head"));
                }
            };
            trace!("received {} for {}", head.status, url);

            self.lock_shared().keep_alive =
                KeepAlive::from_response(SystemTime::now(), head.version, &head.headers);

            if let Some(jar) = settings.jar.as_deref() {
                let mut set_cookies = head.headers.get_all(header::SET_COOKIE).iter();
                jar.set_cookies(&mut set_cookies, &url);
            }

            if redirect::is_redirect(head.status) && mode.follows() {
                if let Some(next) = redirect::resolve_location(&url, &head.headers) {
                    let kind = BodyKind::of(&method, &head)?;

                    if !mode.allows(redirect::scope_of(&url, &next)) {
                        drain_body(&mut read, kind, &token).await?;
                        guard.release();
                        // The hops this dispatch already followed travel
                        // with the error so the retrying tier keeps the
                        // chain-wide limit exact.
                        return Err(Error::forbidden_redirect(head.status, next, hops));
                    }

                    hops += 1;
                    if hops > settings.options.max_redirects {
                        drain_body(&mut read, kind, &token).await?;
                        guard.release();
                        return Err(Error::too_many_redirects(next));
                    }

                    let (next_method, resend) = redirect::redirect_method(head.status, &method);
                    let next_body = if resend {
                        match replay {
                            Some(b) => b,
                            None => {
                                drain_body(&mut read, kind, &token).await?;
                                guard.release();
                                return Err(Error::cannot_redirect_unbuffered(next));
                            }
                        }
                    } else {
                        Body::empty()
                    };

                    drain_body(&mut read, kind, &token).await?;
                    guard.release();
                    drop(read);

                    debug!("following same-endpoint redirect {} -> {}", url, next);
                    url = next;
                    method = next_method;
                    body = Some(next_body);
                    continue;
                }
            }

            let kind = BodyKind::of(&method, &head)?;
            guard.disarm();
            return Ok(ResponseStream::new(
                Arc::clone(self),
                read,
                BodyDecoder::new(kind),
                head,
                url,
                token,
            ));
        }
    }

    async fn prepare_headers(
        &self,
        url: &Url,
        method: &Method,
        body: &Body,
        settings: &RequestSettings,
    ) -> Result<HeaderMap> {
        let mut headers = settings.headers.clone();

        if !headers.contains_key(header::HOST) {
            let own = self.host();
            let host = if own.is_empty() {
                url.host_str().unwrap_or_default().to_owned()
            } else {
                own
            };
            let value = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            };
            headers.insert(
                header::HOST,
                HeaderValue::from_str(&value).map_err(Error::invalid_argument)?,
            );
        }
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(DEFAULT_USER_AGENT),
            );
        }
        if !headers.contains_key(header::CONNECTION) {
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        if let Some(jar) = settings.jar.as_deref() {
            if !headers.contains_key(header::COOKIE) {
                let values = jar.cookies(url);
                if !values.is_empty() {
                    let joined = values
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .collect::<Vec<_>>()
                        .join("; ");
                    headers.insert(
                        header::COOKIE,
                        HeaderValue::from_str(&joined).map_err(Error::invalid_argument)?,
                    );
                }
            }
        }

        // Body framing: a known length travels as Content-Length, an
        // unknown one as chunked transfer encoding.
        match body.length_hint().await? {
            LengthHint::Known(0) if *method == Method::GET || *method == Method::HEAD => {}
            LengthHint::Known(len) => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
            LengthHint::Unknown => {
                headers.insert(
                    header::TRANSFER_ENCODING,
                    HeaderValue::from_static("chunked"),
                );
            }
        }

        Ok(headers)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.lock_shared().token.clone()
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.lock_shared().token.cancel();
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("connection state lock poisoned")
    }
}

impl Default for Connection {
    fn default() -> Connection {
        Connection::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host())
            .field("endpoint", &self.endpoint())
            .field("open", &self.is_open())
            .field("working_requests", &self.working_requests())
            .finish()
    }
}

pub(crate) enum LengthHint {
    Known(u64),
    Unknown,
}

impl Body {
    pub(crate) async fn length_hint(&self) -> Result<LengthHint> {
        match self.as_bytes() {
            Some(bytes) => Ok(LengthHint::Known(bytes.len() as u64)),
            None => match self.file_path() {
                Some(path) => {
                    let meta = tokio::fs::metadata(path).await.map_err(Error::body)?;
                    Ok(LengthHint::Known(meta.len()))
                }
                None => Ok(LengthHint::Unknown),
            },
        }
    }
}

/// Restores the connection's invariants when a dispatch future dies on an
/// error path or is dropped at a cancellation point: the in-flight counter
/// is decremented and, once request bytes have hit the wire, the connection
/// is closed because mid-send or mid-receive state is not recoverable.
struct DispatchGuard {
    conn: Arc<Connection>,
    closing: bool,
    counted: bool,
}

impl DispatchGuard {
    fn new(conn: Arc<Connection>) -> DispatchGuard {
        DispatchGuard {
            conn,
            closing: false,
            counted: false,
        }
    }

    /// The round trip completed cleanly; the connection stays open.
    fn release(&mut self) {
        if self.counted {
            self.conn.ongoing_requests.fetch_sub(1, Ordering::SeqCst);
            self.counted = false;
        }
        self.closing = false;
    }

    /// Accounting responsibility moves to the response stream.
    fn disarm(&mut self) {
        self.closing = false;
        self.counted = false;
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.counted {
            self.conn.ongoing_requests.fetch_sub(1, Ordering::SeqCst);
        }
        if self.closing {
            self.conn.mark_closed();
        }
    }
}

fn origin_form(url: &Url) -> String {
    let mut target = String::from(url.path());
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

async fn write_abortable(
    io: &mut WriteHalf<MaybeTlsStream>,
    buf: &[u8],
    token: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::aborted()),
        res = io.write_all(buf) => res.map_err(Error::io),
    }
}

async fn read_abortable(
    io: &mut ReadHalf<MaybeTlsStream>,
    buf: &mut BytesMut,
    token: &CancellationToken,
) -> Result<usize> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::aborted()),
        res = io.read_buf(buf) => res.map_err(Error::io),
    }
}

async fn send_body(
    io: &mut WriteHalf<MaybeTlsStream>,
    body: BodyInner,
    token: &CancellationToken,
) -> Result<()> {
    match body {
        BodyInner::Empty => Ok(()),
        BodyInner::Bytes(bytes) => write_abortable(io, &bytes, token).await,
        BodyInner::File(path) => {
            let mut file = tokio::fs::File::open(&path).await.map_err(Error::body)?;
            let mut chunk = vec![0u8; FILE_CHUNK];
            loop {
                let n = file.read(&mut chunk).await.map_err(Error::body)?;
                if n == 0 {
                    return Ok(());
                }
                write_abortable(io, &chunk[..n], token).await?;
            }
        }
        BodyInner::Streaming(mut stream) => {
            let mut encoded = BytesMut::new();
            while let Some(item) = stream.next().await {
                let data = item.map_err(Error::body)?;
                if data.is_empty() {
                    continue;
                }
                encoded.clear();
                codec::encode_chunk(&data, &mut encoded);
                write_abortable(io, &encoded, token).await?;
            }
            write_abortable(io, codec::CHUNKED_END, token).await
        }
    }
}

async fn drain_body(
    read: &mut ReadState,
    kind: BodyKind,
    token: &CancellationToken,
) -> Result<()> {
    let mut decoder = BodyDecoder::new(kind);
    loop {
        match decoder.decode(&mut read.buf)? {
            Decoded::Data(_) => continue,
            Decoded::Eof => return Ok(()),
            Decoded::NeedMore => {
                let io = read.io.as_mut().ok_or_else(Error::not_connected)?;
                let n = read_abortable(io, &mut read.buf, token).await?;
                if n == 0 {
                    if decoder.eof_delimited() {
                        decoder.finish_on_eof();
                        return Ok(());
                    }
                    return Err(Error::decode("connection closed mid body"));
                }
            }
        }
    }
}

/// A single-consumer stream over one response body.
///
/// The stream retains the connection's read lock. Draining it to EOF (or
/// dropping it after EOF) releases the connection back to an idle, open
/// state; dropping or [`close`](ResponseStream::close)-ing it early closes
/// the connection, because the unread remainder of the body would otherwise
/// corrupt the next response.
pub struct ResponseStream {
    conn: Arc<Connection>,
    guard: Option<OwnedMutexGuard<ReadState>>,
    decoder: BodyDecoder,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    token: CancellationToken,
    released: bool,
}

impl ResponseStream {
    fn new(
        conn: Arc<Connection>,
        guard: OwnedMutexGuard<ReadState>,
        decoder: BodyDecoder,
        head: ResponseHead,
        url: Url,
        token: CancellationToken,
    ) -> ResponseStream {
        let mut stream = ResponseStream {
            conn,
            guard: Some(guard),
            decoder,
            status: head.status,
            version: head.version,
            headers: head.headers,
            url,
            token,
            released: false,
        };
        // Bodiless responses hand the connection back immediately.
        if stream.decoder.is_eof() {
            stream.release_clean();
        }
        stream
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The protocol version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The URL that produced this response, after connection-level
    /// redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The declared `Content-Length`, when the response carries one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Whether the body has been fully delivered.
    pub fn is_drained(&self) -> bool {
        self.decoder.is_eof()
    }

    /// The next run of body bytes, or `None` at the end of the body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.released {
            return Ok(None);
        }
        loop {
            let read = match self.guard.as_mut() {
                Some(guard) => &mut **guard,
                None => return Ok(None),
            };
            match self.decoder.decode(&mut read.buf) {
                Ok(Decoded::Data(data)) => return Ok(Some(data)),
                Ok(Decoded::Eof) => {
                    self.release_clean();
                    return Ok(None);
                }
                Ok(Decoded::NeedMore) => {
                    let io = match read.io.as_mut() {
                        Some(io) => io,
                        None => {
                            self.release_dirty();
                            return Err(Error::not_connected());
                        }
                    };
                    match read_abortable(io, &mut read.buf, &self.token).await {
                        Ok(0) => {
                            if self.decoder.eof_delimited() {
                                self.decoder.finish_on_eof();
                                // The server delimited the body by closing;
                                // the connection is spent either way.
                                self.conn.mark_closed();
                                self.release_clean();
                                return Ok(None);
                            }
                            self.release_dirty();
                            return Err(Error::decode("connection closed mid body"));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.release_dirty();
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    self.release_dirty();
                    return Err(e);
                }
            }
        }
    }

    /// Reads the remaining body to completion.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    /// Reads the remaining body and interprets it as UTF-8, lossily.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Releases the stream without draining it.
    ///
    /// If the body has not reached EOF this closes the underlying
    /// connection, exactly as dropping the stream would.
    pub fn close(self) {}

    fn release_clean(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.guard = None;
        self.conn.ongoing_requests.fetch_sub(1, Ordering::SeqCst);
    }

    fn release_dirty(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.conn.mark_closed();
        if let Some(read) = self.guard.as_mut() {
            read.io = None;
            read.buf = BytesMut::new();
        }
        self.guard = None;
        self.conn.ongoing_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.decoder.is_eof() {
            self.release_clean();
        } else {
            trace!("response stream dropped before EOF; closing connection");
            self.release_dirty();
        }
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("drained", &self.decoder.is_eof())
            .finish()
    }
}
