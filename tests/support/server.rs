//! Scripted TCP test server.
//!
//! Accepts raw connections and answers each parsed request with whatever
//! the test's handler scripts: a full response, a response followed by a
//! close, or a deliberately stalled partial response. Tracks how many
//! connections and requests it has seen so tests can assert on pooling
//! behavior.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One parsed request as seen on the wire.
#[derive(Clone, Debug)]
pub struct Req {
    /// Index of the connection carrying this request (0-based).
    pub conn: usize,
    /// The raw request head, up to but excluding the blank line.
    pub head: String,
    pub method: String,
    pub target: String,
    /// The raw request body (still chunk-framed for chunked requests).
    pub body: Vec<u8>,
}

impl Req {
    /// The value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        header_of(&self.head, name)
    }

    /// How many times a header occurs.
    pub fn header_count(&self, name: &str) -> usize {
        self.head
            .lines()
            .skip(1)
            .filter(|line| {
                line.split_once(':')
                    .map(|(n, _)| n.trim().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .count()
    }
}

enum Then {
    KeepOpen,
    Close,
    Stall,
}

/// A scripted reply.
pub struct Reply {
    bytes: Vec<u8>,
    then: Then,
    delay: Option<Duration>,
}

impl Reply {
    /// Write the full response, keep the connection open.
    pub fn full(raw: impl Into<Vec<u8>>) -> Reply {
        Reply {
            bytes: raw.into(),
            then: Then::KeepOpen,
            delay: None,
        }
    }

    /// Write the full response, then close the connection.
    pub fn closing(raw: impl Into<Vec<u8>>) -> Reply {
        Reply {
            bytes: raw.into(),
            then: Then::Close,
            delay: None,
        }
    }

    /// Write the given (possibly partial, possibly empty) bytes, then hold
    /// the connection open without ever finishing.
    pub fn stalling(raw: impl Into<Vec<u8>>) -> Reply {
        Reply {
            bytes: raw.into(),
            then: Then::Stall,
            delay: None,
        }
    }

    /// Delay before writing anything.
    pub fn after(mut self, delay: Duration) -> Reply {
        self.delay = Some(delay);
        self
    }
}

pub struct Server {
    addr: SocketAddr,
    conns: Arc<AtomicUsize>,
    reqs: Arc<AtomicUsize>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl Server {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The authority string for pool lookups, `127.0.0.1:port`.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self, path: &str) -> url::Url {
        url::Url::parse(&format!("http://{}{}", self.addr, path)).expect("server url")
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.conns.load(Ordering::SeqCst)
    }

    /// Requests answered so far.
    pub fn requests(&self) -> usize {
        self.reqs.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub async fn start<F>(handler: F) -> Server
where
    F: Fn(Req) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let conns = Arc::new(AtomicUsize::new(0));
    let reqs = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn Fn(Req) -> Reply + Send + Sync> = Arc::new(handler);

    let accept_conns = Arc::clone(&conns);
    let accept_reqs = Arc::clone(&reqs);
    let accept_task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let idx = accept_conns.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let reqs = Arc::clone(&accept_reqs);
            tokio::spawn(serve_conn(stream, idx, handler, reqs));
        }
    });

    Server {
        addr,
        conns,
        reqs,
        accept_task,
    }
}

async fn serve_conn(
    mut stream: TcpStream,
    idx: usize,
    handler: Arc<dyn Fn(Req) -> Reply + Send + Sync>,
    reqs: Arc<AtomicUsize>,
) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // Read up to the end of the request head.
        let head_end = loop {
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                break pos;
            }
            let mut tmp = [0u8; 4096];
            match stream.read(&mut tmp).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        buf.drain(..head_end + 4);

        let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
        let method = parts.next().unwrap_or_default().to_owned();
        let target = parts.next().unwrap_or_default().to_owned();

        let content_length: usize = header_of(&head, "content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let chunked = header_of(&head, "transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);

        let body = if chunked {
            // Keep the raw chunked framing; read until the terminal chunk.
            loop {
                if let Some(pos) = find_subslice(&buf, b"0\r\n\r\n") {
                    break buf.drain(..pos + 5).collect::<Vec<u8>>();
                }
                let mut tmp = [0u8; 4096];
                match stream.read(&mut tmp).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&tmp[..n]),
                }
            }
        } else {
            while buf.len() < content_length {
                let mut tmp = [0u8; 4096];
                match stream.read(&mut tmp).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&tmp[..n]),
                }
            }
            buf.drain(..content_length).collect::<Vec<u8>>()
        };

        reqs.fetch_add(1, Ordering::SeqCst);
        let reply = handler(Req {
            conn: idx,
            head,
            method,
            target,
            body,
        });

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if stream.write_all(&reply.bytes).await.is_err() {
            return;
        }

        match reply.then {
            Then::KeepOpen => {}
            Then::Close => return,
            Then::Stall => {
                // Hold the socket until the peer goes away.
                let mut tmp = [0u8; 1024];
                loop {
                    match stream.read(&mut tmp).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            }
        }
    }
}

fn header_of(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_owned())
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
