//! Redirect handling.
//!
//! Each dispatch tier supports a bounded *scope* of redirect targets: a
//! single connection can only follow targets on its own endpoint, a pool
//! can stay within its host, and a session can hop anywhere. The requested
//! [`RedirectMode`] is clamped by what each tier supports; a redirect beyond
//! the tier's reach surfaces as `forbidden_redirect` so the tier above may
//! retry it.

use http::{header, HeaderMap, Method, StatusCode};
use url::Url;

/// Policy controlling which redirects are permitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedirectMode {
    /// Never follow; 3xx responses are returned to the caller.
    None,
    /// Follow only targets on an endpoint the connection already holds.
    SameEndpoint,
    /// Follow only when host and port both match.
    SameHost,
    /// Follow when the port matches; the host may differ.
    SamePort,
    /// Follow all redirects.
    #[default]
    Any,
}

/// How far a redirect target strays from the URL that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RedirectScope {
    /// Scheme, host and port all unchanged: the byte stream that produced
    /// the response can serve the target too.
    SameEndpoint,
    SameHost,
    SamePort,
    CrossOrigin,
}

impl RedirectMode {
    /// Whether redirects may be followed at all under this mode.
    pub(crate) fn follows(self) -> bool {
        self != RedirectMode::None
    }

    /// Whether a hop of the given scope is permitted.
    ///
    /// Each dispatch tier clamps the requested mode by its own
    /// `SUPPORTED_REDIRECT_MODE` before asking, so the answer is bounded
    /// by what that tier can actually satisfy.
    pub(crate) fn allows(self, scope: RedirectScope) -> bool {
        match self {
            RedirectMode::None => false,
            RedirectMode::SameEndpoint => scope <= RedirectScope::SameEndpoint,
            RedirectMode::SameHost => scope <= RedirectScope::SameHost,
            RedirectMode::SamePort => scope <= RedirectScope::SamePort,
            RedirectMode::Any => true,
        }
    }
}

/// Classifies a hop from `prev` to `next`. A host that would only
/// coincide with the previous one after another DNS resolution is not a
/// same-endpoint target; the wider tiers own that case.
pub(crate) fn scope_of(prev: &Url, next: &Url) -> RedirectScope {
    let host_eq = match (prev.host_str(), next.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    let port_eq = prev.port_or_known_default() == next.port_or_known_default();
    let scheme_eq = prev.scheme() == next.scheme();

    match (host_eq, port_eq) {
        (true, true) if scheme_eq => RedirectScope::SameEndpoint,
        (true, true) => RedirectScope::SameHost,
        (_, true) => RedirectScope::SamePort,
        _ => RedirectScope::CrossOrigin,
    }
}

/// Whether a response status participates in redirect handling.
pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolves the `Location` header of a redirect response against the URL
/// that produced it. Returns `None` when the header is absent or does not
/// form a usable URL.
pub(crate) fn resolve_location(base: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(header::LOCATION)?.to_str().ok()?;
    base.join(location).ok()
}

/// Applies RFC 7231 method rewriting for a redirect hop: 301/302/303 turn a
/// POST into a GET and drop the body, 307/308 preserve both. Returns the
/// method to use and whether the body must be resent.
pub(crate) fn redirect_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status {
        StatusCode::SEE_OTHER => {
            if method == Method::HEAD {
                (Method::HEAD, false)
            } else {
                (Method::GET, false)
            }
        }
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            if method == Method::POST {
                (Method::GET, false)
            } else {
                (method.clone(), true)
            }
        }
        _ => (method.clone(), true),
    }
}

/// Strips credentials that must not leak across origins when a redirect
/// changes host, port, or scheme.
pub(crate) fn remove_sensitive_headers(headers: &mut HeaderMap, next: &Url, previous: &Url) {
    let cross_host = next.host_str() != previous.host_str()
        || next.port_or_known_default() != previous.port_or_known_default()
        || next.scheme() != previous.scheme();
    if cross_host {
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::COOKIE);
        headers.remove(header::PROXY_AUTHORIZATION);
        headers.remove(header::WWW_AUTHENTICATE);
    }
}
