//! HTTP cookies.
//!
//! The dispatch machinery consumes cookies through the narrow
//! [`CookieStore`] interface: look up a `Cookie` header for an outbound URL,
//! absorb `Set-Cookie` headers from an inbound response. [`Jar`] is the
//! default in-memory implementation.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};

use bytes::{BufMut, Bytes, BytesMut};
use cookie::{Cookie as RawCookie, Expiration};
use http::HeaderValue;
use url::Url;

/// Actions for a persistent cookie store providing session support.
pub trait CookieStore: Send + Sync {
    /// Store a set of `Set-Cookie` header values received from `url`.
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url);

    /// Get any `Cookie` values in the store for `url`.
    fn cookies(&self, url: &Url) -> Vec<HeaderValue>;
}

/// Trait for converting types into a shared cookie store
/// ([`Arc<dyn CookieStore>`]).
pub trait IntoCookieStore {
    /// Converts the implementor into an [`Arc<dyn CookieStore>`].
    fn into_cookie_store(self) -> Arc<dyn CookieStore>;
}

impl IntoCookieStore for Arc<dyn CookieStore> {
    #[inline]
    fn into_cookie_store(self) -> Arc<dyn CookieStore> {
        self
    }
}

impl<C> IntoCookieStore for Arc<C>
where
    C: CookieStore + 'static,
{
    #[inline]
    fn into_cookie_store(self) -> Arc<dyn CookieStore> {
        self
    }
}

impl<C> IntoCookieStore for C
where
    C: CookieStore + 'static,
{
    #[inline]
    fn into_cookie_store(self) -> Arc<dyn CookieStore> {
        Arc::new(self)
    }
}

/// A good default `CookieStore` implementation.
///
/// Cookies are bucketed by domain, then by path. Matching follows RFC 6265:
/// domain suffix match, path prefix match, `Secure` honored against the
/// request scheme, expired cookies dropped lazily.
pub struct Jar(RwLock<HashMap<String, HashMap<String, cookie::CookieJar>>>);

impl Jar {
    /// Add a cookie string (a `Set-Cookie` value) to this jar, scoped to
    /// `url` where the cookie does not carry its own domain or path.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        if let Ok(raw) = RawCookie::parse(cookie) {
            self.add_cookie(raw.into_owned(), url);
        }
    }

    /// Add a parsed cookie to this jar.
    pub fn add_cookie(&self, cookie: RawCookie<'static>, url: &Url) {
        let domain = cookie
            .domain()
            .map(normalize_domain)
            .or_else(|| url.host_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let path = cookie
            .path()
            .map(str::to_owned)
            .unwrap_or_else(|| default_path(url).to_owned());

        let mut inner = self.0.write().expect("cookie jar lock poisoned");
        let jar = inner.entry(domain).or_default().entry(path).or_default();

        // RFC 6265: Max-Age=0 or an Expires in the past removes the cookie.
        let expired = match cookie.expires() {
            Some(Expiration::DateTime(dt)) => SystemTime::from(dt) <= SystemTime::now(),
            _ => false,
        } || cookie
            .max_age()
            .is_some_and(|age| age.is_zero());

        if expired {
            jar.remove(cookie);
        } else {
            jar.add(cookie);
        }
    }

    /// Remove every cookie from the jar.
    pub fn clear(&self) {
        self.0.write().expect("cookie jar lock poisoned").clear();
    }
}

impl CookieStore for Jar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for value in cookie_headers {
            let Ok(text) = std::str::from_utf8(value.as_bytes()) else {
                continue;
            };
            if let Ok(raw) = RawCookie::parse(text) {
                self.add_cookie(raw.into_owned(), url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Vec<HeaderValue> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let host = host.to_ascii_lowercase();
        let is_https = url.scheme() == "https";
        let now = SystemTime::now();

        self.0
            .read()
            .expect("cookie jar lock poisoned")
            .iter()
            .filter(|(domain, _)| domain_match(&host, domain))
            .flat_map(|(_, path_map)| {
                path_map
                    .iter()
                    .filter(|(path, _)| path_match(url.path(), path))
                    .flat_map(|(_, jar)| {
                        jar.iter().filter_map(|cookie| {
                            // Secure cookies only travel over HTTPS.
                            if cookie.secure() == Some(true) && !is_https {
                                return None;
                            }

                            if let Some(Expiration::DateTime(dt)) = cookie.expires() {
                                if SystemTime::from(dt) <= now {
                                    return None;
                                }
                            }
                            if let Some(age) = cookie.max_age() {
                                if Duration::try_from(age).map(|d| d.is_zero()).unwrap_or(true) {
                                    return None;
                                }
                            }

                            let name = cookie.name().as_bytes();
                            let value = cookie.value().as_bytes();
                            let mut pair = BytesMut::with_capacity(name.len() + 1 + value.len());
                            pair.put(name);
                            pair.put(&b"="[..]);
                            pair.put(value);

                            HeaderValue::from_maybe_shared(Bytes::from(pair)).ok()
                        })
                    })
            })
            .collect()
    }
}

impl Default for Jar {
    fn default() -> Self {
        Jar(RwLock::new(HashMap::new()))
    }
}

const DEFAULT_PATH: &str = "/";

/// Host-to-domain matching per RFC 6265 §5.1.3: identical, or the host is a
/// subdomain of the cookie domain.
fn domain_match(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    if host == domain {
        return true;
    }
    host.len() > domain.len()
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
        && host.ends_with(domain)
}

/// Request-path to cookie-path matching per RFC 6265 §5.1.4.
fn path_match(req_path: &str, cookie_path: &str) -> bool {
    req_path == cookie_path
        || req_path.starts_with(cookie_path)
            && (cookie_path.ends_with(DEFAULT_PATH)
                || req_path[cookie_path.len()..].starts_with(DEFAULT_PATH))
}

/// Strips any (non-standard) port from a cookie domain attribute.
fn normalize_domain(domain: &str) -> &str {
    domain.split(':').next().unwrap_or(domain)
}

/// The default cookie path of a request URL per RFC 6265 §5.1.4.
fn default_path(url: &Url) -> &str {
    let path = url.path();
    if !path.starts_with(DEFAULT_PATH) {
        return DEFAULT_PATH;
    }
    match path.rfind(DEFAULT_PATH) {
        Some(0) | None => DEFAULT_PATH,
        Some(pos) => &path[..pos],
    }
}
