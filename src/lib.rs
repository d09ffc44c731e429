#![deny(unsafe_code)]
#![cfg_attr(test, deny(warnings))]

//! # tether
//!
//! The core of an HTTP/1.1 client: persistent, possibly TLS-secured
//! connections, bounded per-authority connection pools, and the dispatch
//! machinery that rides on them — DNS resolution, keep-alive accounting,
//! request serialization under per-stream mutual exclusion, incremental
//! response bodies, and redirect-aware re-dispatch across hosts.
//!
//! The tiers nest: a [`Connection`] owns one byte stream and serializes
//! round trips over it; a [`ConnectionPool`] owns a bounded set of shared
//! connections for one authority and decides reuse; a [`Session`] owns one
//! pool per authority and follows redirects across them, carrying a cookie
//! store along.
//!
//! ```rust,no_run
//! use tether::{Body, Method, Session};
//!
//! # async fn run() -> Result<(), tether::Error> {
//! let session = Session::new()?;
//! let url = "http://example.com/index".parse().expect("static url");
//!
//! let stream = session
//!     .ropen(Method::GET, url, Body::empty(), &session.settings())
//!     .await?;
//!
//! assert_eq!(stream.status(), 200);
//! let body = stream.bytes().await?;
//! # drop(body);
//! # Ok(())
//! # }
//! ```
//!
//! Synchronous forms of the session operations live in [`blocking`].

mod body;
pub mod blocking;
mod codec;
mod conn;
pub mod cookie;
pub mod dns;
mod endpoint;
mod error;
mod keep_alive;
mod pool;
mod redirect;
mod request;
mod session;
mod tls;

pub use self::body::Body;
pub use self::conn::{Connection, ResponseStream};
pub use self::endpoint::Endpoint;
pub use self::error::{BoxError, Error, Result};
pub use self::keep_alive::KeepAlive;
pub use self::pool::{ConnectionPool, DEFAULT_POOL_LIMIT};
pub use self::redirect::RedirectMode;
pub use self::request::{RequestOptions, RequestSettings};
pub use self::session::{Session, SessionBuilder};
pub use self::tls::{TlsContext, TlsContextBuilder};

pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
pub use url::Url;
