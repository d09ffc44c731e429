//! DNS resolution.
//!
//! Resolution is pluggable through the [`Resolve`] trait. The default,
//! [`GaiResolver`], runs blocking `getaddrinfo` calls on the runtime's
//! blocking thread pool. [`ResolverWithOverrides`] pins chosen host names to
//! fixed addresses, which is useful in tests and for split-horizon setups.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs},
    pin::Pin,
    sync::Arc,
    vec,
};

use log::debug;

use crate::error::BoxError;

/// A domain name to resolve into IP addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from a host string.
    #[inline]
    pub fn new(host: Box<str>) -> Name {
        Name { host }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value.into())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Alias for an `Iterator` trait object over `SocketAddr`.
pub type Addrs = Box<dyn Iterator<Item = SocketAddr> + Send>;

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, BoxError>> + Send>>;

/// Trait for customizing DNS resolution.
///
/// The port of each returned `SocketAddr` is ignored; the pool attaches the
/// port taken from the authority being looked up.
pub trait Resolve: Send + Sync {
    /// Performs DNS resolution on a `Name`.
    fn resolve(&self, name: Name) -> Resolving;
}

/// Trait for converting types into a shared DNS resolver ([`Arc<dyn Resolve>`]).
///
/// Implemented for any [`Resolve`] type, `Arc<T>` where `T: Resolve`, and
/// `Arc<dyn Resolve>`, so APIs can accept a resolver without manual boxing.
pub trait IntoResolve {
    /// Converts the implementor into an [`Arc<dyn Resolve>`].
    fn into_resolve(self) -> Arc<dyn Resolve>;
}

impl IntoResolve for Arc<dyn Resolve> {
    #[inline]
    fn into_resolve(self) -> Arc<dyn Resolve> {
        self
    }
}

impl<R> IntoResolve for Arc<R>
where
    R: Resolve + 'static,
{
    #[inline]
    fn into_resolve(self) -> Arc<dyn Resolve> {
        self
    }
}

impl<R> IntoResolve for R
where
    R: Resolve + 'static,
{
    #[inline]
    fn into_resolve(self) -> Arc<dyn Resolve> {
        Arc::new(self)
    }
}

/// A resolver using blocking `getaddrinfo` calls in a threadpool.
#[derive(Clone, Default)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Creates a new [`GaiResolver`].
    pub fn new() -> Self {
        GaiResolver { _priv: () }
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        // IP literals skip the thread pool round trip.
        if let Some(addrs) = SocketAddrs::try_parse(name.as_str(), 0) {
            return Box::pin(std::future::ready(Ok(Box::new(addrs) as Addrs)));
        }

        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                debug!("resolving {}", name);
                (name.as_str(), 0)
                    .to_socket_addrs()
                    .map(|iter| SocketAddrs { iter })
            });

            match handle.await {
                Ok(Ok(addrs)) => Ok(Box::new(addrs) as Addrs),
                Ok(Err(err)) => Err(err.into()),
                Err(join_err) => {
                    Err(io::Error::new(io::ErrorKind::Interrupted, join_err).into())
                }
            }
        })
    }
}

/// An iterator of socket addresses backed by a `Vec`.
pub(crate) struct SocketAddrs {
    iter: vec::IntoIter<SocketAddr>,
}

impl SocketAddrs {
    pub(crate) fn try_parse(host: &str, port: u16) -> Option<SocketAddrs> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            let addr = SocketAddrV4::new(addr, port);
            return Some(SocketAddrs {
                iter: vec![SocketAddr::V4(addr)].into_iter(),
            });
        }
        if let Ok(addr) = host.parse::<Ipv6Addr>() {
            let addr = SocketAddrV6::new(addr, port, 0, 0);
            return Some(SocketAddrs {
                iter: vec![SocketAddr::V6(addr)].into_iter(),
            });
        }
        None
    }
}

impl Iterator for SocketAddrs {
    type Item = SocketAddr;

    #[inline]
    fn next(&mut self) -> Option<SocketAddr> {
        self.iter.next()
    }
}

/// DNS resolver that supports hostname overrides.
///
/// Checks manual hostname-to-address mappings before falling back to the
/// wrapped resolver.
pub struct ResolverWithOverrides {
    fallback: Arc<dyn Resolve>,
    overrides: Arc<HashMap<String, Vec<SocketAddr>>>,
}

impl ResolverWithOverrides {
    /// Creates a new [`ResolverWithOverrides`] around a fallback resolver.
    pub fn new(
        fallback: impl IntoResolve,
        overrides: HashMap<String, Vec<SocketAddr>>,
    ) -> Self {
        ResolverWithOverrides {
            fallback: fallback.into_resolve(),
            overrides: Arc::new(overrides),
        }
    }
}

impl Resolve for ResolverWithOverrides {
    fn resolve(&self, name: Name) -> Resolving {
        match self.overrides.get(name.as_str()) {
            Some(dest) => {
                let addrs: Addrs = Box::new(dest.clone().into_iter());
                Box::pin(std::future::ready(Ok(addrs)))
            }
            None => self.fallback.resolve(name),
        }
    }
}
