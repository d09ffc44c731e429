//! A session: one pool per authority, cross-host redirects, shared cookies.
//!
//! The session is the widest dispatch tier. A connection follows redirects
//! that stay on its endpoint, and everything beyond that surfaces as a
//! forbidden-redirect error carrying the target; the session catches those,
//! rewrites the method per RFC 7231, strips credentials on cross-origin
//! hops, and re-dispatches on the pool for the new authority — all against
//! a single redirect budget shared with the connection tier.

use std::{collections::HashMap, sync::Arc};

use http::Method;
use log::debug;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::body::Body;
use crate::conn::ResponseStream;
use crate::cookie::{CookieStore, IntoCookieStore, Jar};
use crate::dns::{GaiResolver, IntoResolve, Resolve};
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, DEFAULT_POOL_LIMIT};
use crate::redirect::{self, RedirectMode};
use crate::request::{RequestOptions, RequestSettings};
use crate::tls::TlsContext;

#[derive(Clone, Hash, PartialEq, Eq)]
struct PoolKey {
    https: bool,
    host: String,
    port: u16,
}

/// A shared, cloneable handle to a set of per-authority connection pools.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    pools: AsyncMutex<HashMap<PoolKey, Arc<ConnectionPool>>>,
    tls: TlsContext,
    resolver: Arc<dyn Resolve>,
    jar: Option<Arc<dyn CookieStore>>,
    options: RequestOptions,
    pool_limit: usize,
}

/// Configures and builds a [`Session`].
pub struct SessionBuilder {
    tls: Option<TlsContext>,
    resolver: Arc<dyn Resolve>,
    jar: Option<Arc<dyn CookieStore>>,
    options: RequestOptions,
    pool_limit: usize,
    cookie_store_enabled: bool,
}

impl Session {
    /// The session tier may follow any redirect.
    pub const SUPPORTED_REDIRECT_MODE: RedirectMode = RedirectMode::Any;

    /// A session with default TLS, DNS, options and pool sizing.
    pub fn new() -> Result<Session> {
        Session::builder().build()
    }

    /// Starts building a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            tls: None,
            resolver: Arc::new(GaiResolver::new()),
            jar: None,
            options: RequestOptions::default(),
            pool_limit: DEFAULT_POOL_LIMIT,
            cookie_store_enabled: false,
        }
    }

    /// Issues a request, following redirects across hosts as permitted by
    /// the effective [`RequestOptions`], and returns the final response
    /// body stream.
    ///
    /// The previous hop's body is always drained before the next hop is
    /// dispatched, and every hop — whether the connection followed it
    /// internally or the session re-dispatched it — counts against the one
    /// `max_redirects` budget.
    pub async fn ropen(
        &self,
        method: Method,
        url: Url,
        body: Body,
        settings: &RequestSettings,
    ) -> Result<ResponseStream> {
        let mut url = url;
        let mut method = method;
        let mut body = Some(body);
        let mut settings = self.effective_settings(settings);
        let budget = settings.options.max_redirects;
        let mode = settings.options.redirect.min(Self::SUPPORTED_REDIRECT_MODE);
        let mut hops = 0usize;

        loop {
            // The connection tier enforces the remainder of the shared
            // redirect budget on the hops it follows itself.
            settings.options.max_redirects = budget.saturating_sub(hops);

            let pool = self.pool_for(&url).await?;
            let current_body = body.take().unwrap_or_default();
            let replay = current_body.try_clone();

            match pool.ropen(method.clone(), &url, current_body, &settings).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_forbidden_redirect() => {
                    let (Some(next), Some(status)) = (e.url().cloned(), e.status()) else {
                        return Err(e);
                    };

                    let scope = redirect::scope_of(&url, &next);
                    if !mode.allows(scope) {
                        return Err(e);
                    }

                    // The connection reports the same-endpoint hops it
                    // followed before refusing, so endpoint-tier and
                    // session-tier hops spend the same budget.
                    hops += e.redirect_hops() + 1;
                    if hops > budget {
                        return Err(Error::too_many_redirects(next));
                    }

                    let (next_method, resend) = redirect::redirect_method(status, &method);
                    let next_body = if resend {
                        match replay {
                            Some(b) => b,
                            None => return Err(Error::cannot_redirect_unbuffered(next)),
                        }
                    } else {
                        Body::empty()
                    };

                    redirect::remove_sensitive_headers(&mut settings.headers, &next, &url);

                    debug!("session redirect {} -> {} ({status})", url, next);
                    url = next;
                    method = next_method;
                    body = Some(next_body);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The pool serving `url`'s authority, created and resolved on first
    /// use.
    pub async fn pool_for(&self, url: &Url) -> Result<Arc<ConnectionPool>> {
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported scheme: {other}"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_argument("url has no host"))?
            .to_ascii_lowercase();
        let port = url.port_or_known_default().unwrap_or(if https { 443 } else { 80 });

        let key = PoolKey {
            https,
            host: host.clone(),
            port,
        };

        let mut pools = self.inner.pools.lock().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(Arc::clone(pool));
        }

        let pool = if https {
            ConnectionPool::with_tls(self.inner.tls.clone(), self.inner.pool_limit)
        } else {
            ConnectionPool::new(self.inner.pool_limit)
        };
        let pool = pool.resolver(Arc::clone(&self.inner.resolver));
        pool.lookup(&format!("{host}:{port}")).await?;

        let pool = Arc::new(pool);
        pools.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// Merges the session's defaults into per-request settings: the
    /// session's cookie store and options apply wherever the caller left
    /// them unset.
    fn effective_settings(&self, settings: &RequestSettings) -> RequestSettings {
        let mut merged = settings.clone();
        if merged.jar.is_none() {
            merged.jar = self.inner.jar.clone();
        }
        merged
    }

    /// Settings seeded with this session's default options and cookie
    /// store, ready for per-request additions.
    pub fn settings(&self) -> RequestSettings {
        let mut settings = RequestSettings::new().options(self.inner.options.clone());
        settings.jar = self.inner.jar.clone();
        settings
    }

    /// The session-wide default options.
    pub fn options(&self) -> &RequestOptions {
        &self.inner.options
    }

    /// The session's cookie store, when one is enabled.
    pub fn cookie_store(&self) -> Option<&Arc<dyn CookieStore>> {
        self.inner.jar.as_ref()
    }
}

impl SessionBuilder {
    /// Uses a prebuilt TLS context instead of the default one.
    pub fn tls_context(mut self, tls: TlsContext) -> SessionBuilder {
        self.tls = Some(tls);
        self
    }

    /// Replaces the DNS resolver used by every pool this session creates.
    pub fn resolver(mut self, resolver: impl IntoResolve) -> SessionBuilder {
        self.resolver = resolver.into_resolve();
        self
    }

    /// Enables an in-memory cookie jar shared by all requests.
    pub fn cookie_store(mut self, enabled: bool) -> SessionBuilder {
        self.cookie_store_enabled = enabled;
        self
    }

    /// Uses a caller-provided cookie store.
    pub fn cookie_provider(mut self, jar: impl IntoCookieStore) -> SessionBuilder {
        self.jar = Some(jar.into_cookie_store());
        self
    }

    /// Session-wide default request options.
    pub fn options(mut self, options: RequestOptions) -> SessionBuilder {
        self.options = options;
        self
    }

    /// The per-authority connection limit.
    pub fn pool_limit(mut self, limit: usize) -> SessionBuilder {
        self.pool_limit = limit;
        self
    }

    /// Builds the session. Fails when the default TLS context cannot be
    /// initialized.
    pub fn build(self) -> Result<Session> {
        let tls = match self.tls {
            Some(tls) => tls,
            None => TlsContext::new()?,
        };
        let jar = match self.jar {
            Some(jar) => Some(jar),
            None if self.cookie_store_enabled => {
                Some(Arc::new(Jar::default()) as Arc<dyn CookieStore>)
            }
            None => None,
        };
        Ok(Session {
            inner: Arc::new(SessionInner {
                pools: AsyncMutex::new(HashMap::new()),
                tls,
                resolver: self.resolver,
                jar,
                options: self.options,
                pool_limit: self.pool_limit,
            }),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pool_limit", &self.inner.pool_limit)
            .field("cookies", &self.inner.jar.is_some())
            .finish()
    }
}
