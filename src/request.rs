//! Per-request settings.

use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::cookie::{CookieStore, IntoCookieStore};
use crate::redirect::RedirectMode;

/// Knobs that shape how a single request is dispatched.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Which redirect targets may be followed.
    pub redirect: RedirectMode,
    /// Upper bound on the length of a redirect chain, counting every hop at
    /// every tier.
    pub max_redirects: usize,
    /// Overall deadline for establishing the response head.
    pub timeout: Option<Duration>,
    /// Per-request override of certificate verification, applied when this
    /// request causes a new TLS connection to be opened. `None` keeps the
    /// pool's policy.
    pub accept_invalid_certs: Option<bool>,
}

impl Default for RequestOptions {
    fn default() -> RequestOptions {
        RequestOptions {
            redirect: RedirectMode::default(),
            max_redirects: 10,
            timeout: None,
            accept_invalid_certs: None,
        }
    }
}

/// Caller-supplied headers, dispatch options, and the cookie store that a
/// request travels with.
#[derive(Clone, Default)]
pub struct RequestSettings {
    /// Headers merged into the request; derived headers (`Host`,
    /// `User-Agent`, `Connection`) are only injected when absent here.
    pub headers: HeaderMap,
    /// Dispatch options.
    pub options: RequestOptions,
    /// Cookie store consulted for `Cookie` and fed from `Set-Cookie`.
    pub jar: Option<Arc<dyn CookieStore>>,
}

impl RequestSettings {
    /// Settings with default options, no headers, and no cookie store.
    pub fn new() -> RequestSettings {
        RequestSettings::default()
    }

    /// Adds a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> RequestSettings {
        self.headers.append(name, value);
        self
    }

    /// Replaces the dispatch options.
    pub fn options(mut self, options: RequestOptions) -> RequestSettings {
        self.options = options;
        self
    }

    /// Attaches a cookie store.
    pub fn cookie_store(mut self, jar: impl IntoCookieStore) -> RequestSettings {
        self.jar = Some(jar.into_cookie_store());
        self
    }
}

impl std::fmt::Debug for RequestSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSettings")
            .field("headers", &self.headers)
            .field("options", &self.options)
            .field("jar", &self.jar.as_ref().map(|_| "CookieStore"))
            .finish()
    }
}
