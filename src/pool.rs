//! A bounded pool of connections to one authority.
//!
//! The pool owns DNS resolution for its authority and an endpoint-keyed
//! multimap of shared connections. Allocation is serialized by one internal
//! mutex; in particular the mutex is held *across* the connect of a new
//! connection, which is what bounds racing opens to a single transient
//! over-allocation.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::SystemTime,
};

use http::Method;
use log::{debug, trace};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::body::Body;
use crate::conn::{Connection, ResponseStream};
use crate::dns::{GaiResolver, IntoResolve, Name, Resolve};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::redirect::RedirectMode;
use crate::request::RequestSettings;
use crate::tls::TlsContext;

/// Connections a pool may hold when no limit is given at construction.
pub const DEFAULT_POOL_LIMIT: usize = 6;

struct PoolInner {
    host: String,
    endpoints: Vec<Endpoint>,
    conns: HashMap<Endpoint, Vec<Arc<Connection>>>,
}

impl PoolInner {
    fn total(&self) -> usize {
        self.conns.values().map(Vec::len).sum()
    }
}

/// A bounded, endpoint-keyed pool of connections for one authority.
pub struct ConnectionPool {
    limit: usize,
    tls: Option<TlsContext>,
    resolver: Arc<dyn Resolve>,
    active: AtomicUsize,
    connecting: AtomicUsize,
    inner: AsyncMutex<PoolInner>,
}

impl ConnectionPool {
    /// The widest redirect scope a pool can satisfy from its own
    /// connections.
    pub const SUPPORTED_REDIRECT_MODE: RedirectMode = RedirectMode::SameHost;

    /// A plain-HTTP pool holding at most `limit` connections.
    pub fn new(limit: usize) -> ConnectionPool {
        ConnectionPool::build(None, limit)
    }

    /// An HTTPS pool; every connection it opens handshakes with `tls`.
    pub fn with_tls(tls: TlsContext, limit: usize) -> ConnectionPool {
        ConnectionPool::build(Some(tls), limit)
    }

    fn build(tls: Option<TlsContext>, limit: usize) -> ConnectionPool {
        ConnectionPool {
            limit,
            tls,
            resolver: Arc::new(GaiResolver::new()),
            active: AtomicUsize::new(0),
            connecting: AtomicUsize::new(0),
            inner: AsyncMutex::new(PoolInner {
                host: String::new(),
                endpoints: Vec::new(),
                conns: HashMap::new(),
            }),
        }
    }

    /// Replaces the DNS resolver. Takes effect on the next `lookup`.
    pub fn resolver(mut self, resolver: impl IntoResolve) -> ConnectionPool {
        self.resolver = resolver.into_resolve();
        self
    }

    /// The maximum number of connections this pool will hold.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The number of connections currently held. May transiently exceed
    /// `limit()` by one while racing opens settle.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The number of connections currently in the opening state.
    pub fn connecting(&self) -> usize {
        self.connecting.load(Ordering::SeqCst)
    }

    /// The canonical host this pool serves, set by `lookup`.
    pub async fn host(&self) -> String {
        self.inner.lock().await.host.clone()
    }

    /// Resolves `authority` (`host[:port]`) and replaces this pool's host
    /// and endpoint list.
    ///
    /// The port defaults to the pool's scheme (443 with TLS, 80 without).
    /// Fails with a not-found error when resolution yields no endpoints.
    pub async fn lookup(&self, authority: &str) -> Result<()> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let url = Url::parse(&format!("{scheme}://{authority}/"))
            .map_err(|e| Error::invalid_argument(format!("invalid authority: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_argument("authority has no host"))?
            .to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or(if self.tls.is_some() { 443 } else { 80 });

        let mut inner = self.inner.lock().await;
        debug!("resolving {host}");
        let addrs = self
            .resolver
            .resolve(Name::from(host.as_str()))
            .await
            .map_err(Error::transport)?;

        let endpoints: Vec<Endpoint> = addrs
            .map(|mut addr| {
                addr.set_port(port);
                Endpoint::Tcp(addr)
            })
            .collect();
        if endpoints.is_empty() {
            return Err(Error::not_found());
        }

        trace!("resolved {host} to {} endpoints", endpoints.len());
        inner.host = host;
        inner.endpoints = endpoints;
        Ok(())
    }

    /// Returns a connection satisfying the pool's reuse policy.
    ///
    /// Preference order: an idle open connection within its keep-alive
    /// deadline, then a freshly opened connection to the least-loaded
    /// endpoint while under the limit, then the least-loaded existing
    /// connection, whose locks will serialize the callers sharing it.
    pub async fn get_connection(&self) -> Result<Arc<Connection>> {
        self.get_connection_with(None).await
    }

    pub(crate) async fn get_connection_with(
        &self,
        verify_override: Option<bool>,
    ) -> Result<Arc<Connection>> {
        let mut inner = self.inner.lock().await;
        let now = SystemTime::now();

        // Drop connections that can no longer serve anything: closed or
        // past their keep-alive deadline, with no stream outstanding.
        inner.conns.retain(|_, conns| {
            conns.retain(|c| {
                let dead =
                    c.working_requests() == 0 && (!c.is_open() || !c.keep_alive().usable_at(now));
                if dead {
                    trace!("pruning dead connection to {:?}", c.endpoint());
                }
                !dead
            });
            !conns.is_empty()
        });
        self.active.store(inner.total(), Ordering::SeqCst);

        // Idle reuse.
        for conns in inner.conns.values() {
            for conn in conns {
                if conn.working_requests() == 0
                    && conn.is_open()
                    && conn.keep_alive().usable_at(now)
                {
                    trace!("reusing idle connection to {:?}", conn.endpoint());
                    return Ok(Arc::clone(conn));
                }
            }
        }

        let total = inner.total();
        if total < self.limit {
            let PoolInner {
                host,
                endpoints,
                conns,
            } = &mut *inner;
            if endpoints.is_empty() {
                return Err(Error::not_found());
            }

            // Least-occupied endpoint first; the sort is stable so the
            // resolver's ordering breaks ties.
            endpoints.sort_by_key(|ep| conns.get(ep).map_or(0, Vec::len));
            let endpoint = endpoints[0].clone();

            let conn = Arc::new(match &self.tls {
                Some(ctx) => Connection::with_tls(ctx.clone()),
                None => Connection::new(),
            });
            conn.set_host(host)?;

            debug!(
                "opening connection {} of {} to {endpoint}",
                total + 1,
                self.limit
            );
            // The pool mutex stays held across the connect; concurrent
            // callers queue here instead of racing opens past the limit.
            self.connecting.fetch_add(1, Ordering::SeqCst);
            let connected = conn.connect_with(&endpoint, verify_override).await;
            self.connecting.fetch_sub(1, Ordering::SeqCst);
            connected?;

            conns.entry(endpoint).or_default().push(Arc::clone(&conn));
            self.active.store(inner.total(), Ordering::SeqCst);
            return Ok(conn);
        }

        // At capacity: share the connection with the fewest requests in
        // flight, penalizing ones that have broken under their streams.
        inner
            .conns
            .values()
            .flatten()
            .min_by_key(|c| c.working_requests() + usize::from(!c.is_open()))
            .map(Arc::clone)
            .ok_or_else(Error::not_found)
    }

    /// Obtains a connection and dispatches a request on it.
    ///
    /// The requested redirect mode is clamped to what this pool's
    /// connections can satisfy; hops beyond that surface as
    /// forbidden-redirect errors for the session tier to retry.
    pub async fn ropen(
        &self,
        method: Method,
        url: &Url,
        body: Body,
        settings: &RequestSettings,
    ) -> Result<ResponseStream> {
        let conn = match settings.options.timeout {
            Some(deadline) => tokio::time::timeout(
                deadline,
                self.get_connection_with(settings.options.accept_invalid_certs),
            )
            .await
            .map_err(|_| Error::timed_out())??,
            None => {
                self.get_connection_with(settings.options.accept_invalid_certs)
                    .await?
            }
        };

        let mut settings = settings.clone();
        settings.options.redirect = settings
            .options
            .redirect
            .min(Self::SUPPORTED_REDIRECT_MODE);
        conn.ropen(method, url, body, &settings).await
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("limit", &self.limit)
            .field("active", &self.active())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
