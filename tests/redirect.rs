mod support;

use std::sync::{Arc, Mutex};

use support::server::{self, Reply};
use tether::{
    Body, ConnectionPool, Method, RedirectMode, RequestOptions, RequestSettings, Session,
};

fn redirect_to(location: &str, status: &str) -> Reply {
    Reply::full(format!(
        "HTTP/1.1 {status}\r\nLocation: {location}\r\nContent-Length: 0\r\n\r\n"
    ))
}

fn ok_with(body: &str) -> Reply {
    Reply::full(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{body}",
        body.len()
    ))
}

/// Pins the given fake host names to 127.0.0.1 so redirect tests can use
/// real-looking cross-host URLs.
fn pinned_resolver(hosts: &[&str]) -> tether::dns::ResolverWithOverrides {
    let loopback: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let overrides = hosts
        .iter()
        .map(|h| (h.to_string(), vec![loopback]))
        .collect();
    tether::dns::ResolverWithOverrides::new(tether::dns::GaiResolver::new(), overrides)
}

#[tokio::test]
async fn endpoint_redirect_is_followed_on_one_connection() {
    let server = server::start(|req| match req.target.as_str() {
        "/a" => redirect_to("/b", "301 Moved Permanently"),
        "/b" => ok_with("done"),
        other => panic!("unexpected target {other}"),
    })
    .await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let stream = pool
        .ropen(Method::GET, &server.url("/a"), Body::empty(), &RequestSettings::new())
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.url().path(), "/b");
    let body = stream.bytes().await.unwrap();
    assert_eq!(&body[..], b"done");

    assert_eq!(server.connections(), 1);
    let conn = pool.get_connection().await.unwrap();
    assert_eq!(conn.working_requests(), 0);
}

#[tokio::test]
async fn cross_host_redirect_is_forbidden_at_connection_scope() {
    let other = server::start(|_req| ok_with("elsewhere")).await;
    let other_url = format!("http://other.test:{}/b", other.addr().port());

    let origin_location = other_url.clone();
    let origin = server::start(move |_req| {
        redirect_to(&origin_location, "301 Moved Permanently")
    })
    .await;

    let pool = ConnectionPool::new(2).resolver(pinned_resolver(&["origin.test"]));
    pool.lookup(&format!("origin.test:{}", origin.addr().port()))
        .await
        .unwrap();

    let url = url::Url::parse(&format!("http://origin.test:{}/a", origin.addr().port())).unwrap();
    let err = pool
        .ropen(Method::GET, &url, Body::empty(), &RequestSettings::new())
        .await
        .unwrap_err();

    assert!(err.is_forbidden_redirect());
    assert_eq!(err.status().unwrap(), 301);
    assert_eq!(err.url().unwrap().as_str(), other_url);
    assert_eq!(other.requests(), 0);

    // The refused redirect drained cleanly; the connection is reusable.
    let conn = pool.get_connection().await.unwrap();
    assert!(conn.is_open());
    assert_eq!(conn.working_requests(), 0);
    assert_eq!(origin.connections(), 1);
}

#[tokio::test]
async fn session_follows_the_cross_host_redirect() {
    let other = server::start(|_req| ok_with("elsewhere")).await;
    let other_url = format!("http://other.test:{}/b", other.addr().port());

    let origin_location = other_url.clone();
    let origin = server::start(move |_req| {
        redirect_to(&origin_location, "301 Moved Permanently")
    })
    .await;

    let session = Session::builder()
        .resolver(pinned_resolver(&["origin.test", "other.test"]))
        .build()
        .unwrap();

    let url = url::Url::parse(&format!("http://origin.test:{}/a", origin.addr().port())).unwrap();
    let stream = session
        .ropen(Method::GET, url, Body::empty(), &session.settings())
        .await
        .unwrap();

    assert_eq!(stream.status(), 200);
    assert_eq!(stream.url().as_str(), other_url);
    let body = stream.bytes().await.unwrap();
    assert_eq!(&body[..], b"elsewhere");
    assert_eq!(origin.requests(), 1);
    assert_eq!(other.requests(), 1);
}

#[tokio::test]
async fn session_respects_the_redirect_mode() {
    let origin = server::start(|_req| redirect_to("http://other.test:9/b", "301 Moved Permanently")).await;

    let session = Session::builder()
        .resolver(pinned_resolver(&["origin.test", "other.test"]))
        .options(RequestOptions {
            redirect: RedirectMode::SameHost,
            ..RequestOptions::default()
        })
        .build()
        .unwrap();

    let url = url::Url::parse(&format!("http://origin.test:{}/a", origin.addr().port())).unwrap();
    let err = session
        .ropen(Method::GET, url, Body::empty(), &session.settings())
        .await
        .unwrap_err();
    assert!(err.is_forbidden_redirect());
}

#[tokio::test]
async fn redirect_mode_none_returns_the_redirect_response() {
    let server = server::start(|_req| redirect_to("/b", "302 Found")).await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let settings = RequestSettings::new().options(RequestOptions {
        redirect: RedirectMode::None,
        ..RequestOptions::default()
    });
    let stream = pool
        .ropen(Method::GET, &server.url("/a"), Body::empty(), &settings)
        .await
        .unwrap();
    assert_eq!(stream.status(), 302);
    assert_eq!(stream.headers().get("location").unwrap(), "/b");
}

#[tokio::test]
async fn see_other_rewrites_post_to_get() {
    let reqs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reqs);
    let server = server::start(move |req| {
        let reply = match req.target.as_str() {
            "/submit" => redirect_to("/result", "303 See Other"),
            "/result" => ok_with("created"),
            other => panic!("unexpected target {other}"),
        };
        seen.lock().unwrap().push(req);
        reply
    })
    .await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let stream = pool
        .ropen(
            Method::POST,
            &server.url("/submit"),
            Body::from("payload"),
            &RequestSettings::new(),
        )
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    stream.bytes().await.unwrap();

    let reqs = reqs.lock().unwrap();
    assert_eq!(reqs[0].method, "POST");
    assert_eq!(reqs[0].body, b"payload");
    assert_eq!(reqs[1].method, "GET");
    assert!(reqs[1].body.is_empty());
    assert!(reqs[1].header("content-length").is_none());
}

#[tokio::test]
async fn temporary_redirect_preserves_method_and_body() {
    let reqs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reqs);
    let server = server::start(move |req| {
        let reply = match req.target.as_str() {
            "/submit" => redirect_to("/retry", "307 Temporary Redirect"),
            "/retry" => ok_with("accepted"),
            other => panic!("unexpected target {other}"),
        };
        seen.lock().unwrap().push(req);
        reply
    })
    .await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let stream = pool
        .ropen(
            Method::POST,
            &server.url("/submit"),
            Body::from("payload"),
            &RequestSettings::new(),
        )
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    stream.bytes().await.unwrap();

    let reqs = reqs.lock().unwrap();
    assert_eq!(reqs[1].method, "POST");
    assert_eq!(reqs[1].body, b"payload");
}

#[tokio::test]
async fn streaming_body_cannot_cross_a_replaying_redirect() {
    let server = server::start(|req| match req.target.as_str() {
        "/submit" => redirect_to("/retry", "307 Temporary Redirect"),
        other => panic!("unexpected target {other}"),
    })
    .await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("pay"), Ok("load")];
    let body = Body::wrap_stream(futures_util::stream::iter(chunks));

    let err = pool
        .ropen(Method::POST, &server.url("/submit"), body, &RequestSettings::new())
        .await
        .unwrap_err();
    assert!(err.is_cannot_redirect_unbuffered());
}

#[tokio::test]
async fn redirect_budget_spans_tiers() {
    let other = server::start(|_req| ok_with("done")).await;
    let other_url = format!("http://other.test:{}/c", other.addr().port());

    let cross_target = other_url.clone();
    let origin = server::start(move |req| match req.target.as_str() {
        "/a" => redirect_to("/b", "301 Moved Permanently"),
        "/b" => redirect_to(&cross_target, "301 Moved Permanently"),
        unexpected => panic!("unexpected target {unexpected}"),
    })
    .await;

    let url = url::Url::parse(&format!("http://origin.test:{}/a", origin.addr().port())).unwrap();

    // The chain is two hops: one endpoint-tier (/a -> /b), one cross-host
    // (/b -> other.test). A budget of one must refuse it even though each
    // tier alone stays within its count.
    let session = Session::builder()
        .resolver(pinned_resolver(&["origin.test", "other.test"]))
        .options(RequestOptions {
            max_redirects: 1,
            ..RequestOptions::default()
        })
        .build()
        .unwrap();
    let err = session
        .ropen(Method::GET, url.clone(), Body::empty(), &session.settings())
        .await
        .unwrap_err();
    assert!(err.is_too_many_redirects());
    assert_eq!(other.requests(), 0);

    // A budget of two follows it to the end.
    let session = Session::builder()
        .resolver(pinned_resolver(&["origin.test", "other.test"]))
        .options(RequestOptions {
            max_redirects: 2,
            ..RequestOptions::default()
        })
        .build()
        .unwrap();
    let stream = session
        .ropen(Method::GET, url, Body::empty(), &session.settings())
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.url().as_str(), other_url);
    let body = stream.bytes().await.unwrap();
    assert_eq!(&body[..], b"done");
    assert_eq!(other.requests(), 1);
}

#[tokio::test]
async fn redirect_chains_are_bounded() {
    let server = server::start(|_req| redirect_to("/loop", "302 Found")).await;

    let pool = ConnectionPool::new(2);
    pool.lookup(&server.authority()).await.unwrap();

    let settings = RequestSettings::new().options(RequestOptions {
        max_redirects: 3,
        ..RequestOptions::default()
    });
    let err = pool
        .ropen(Method::GET, &server.url("/start"), Body::empty(), &settings)
        .await
        .unwrap_err();
    assert!(err.is_too_many_redirects());
    // The initial request plus the permitted hops, and nothing more.
    assert_eq!(server.requests(), 4);
}
