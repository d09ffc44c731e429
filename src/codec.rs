//! HTTP/1.1 wire codec.
//!
//! A thin streaming layer between the connection and the socket: request
//! heads and bodies are serialized into a scratch buffer, response heads are
//! parsed with `httparse` once enough bytes have accumulated, and response
//! bodies are decoded incrementally by [`BodyDecoder`] (content-length,
//! chunked, or close-delimited).

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

use crate::error::{Error, Result};

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A parsed response head.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Serializes a request head into `buf`. The request line always speaks
/// HTTP/1.1; `target` is the origin-form path plus query.
pub(crate) fn write_head(buf: &mut BytesMut, method: &Method, target: &str, headers: &HeaderMap) {
    buf.reserve(target.len() + 64);
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers.iter() {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
}

/// Attempts to parse a response head out of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the head bytes
/// are consumed from `buf`, leaving any body prefix in place.
pub(crate) fn parse_head(buf: &mut BytesMut) -> Result<Option<ResponseHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let consumed = match response.parse(&buf[..]) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_BYTES {
                return Err(Error::decode("response head too large"));
            }
            return Ok(None);
        }
        Err(e) => return Err(Error::decode(e)),
    };

    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::decode("invalid status code"))?;
    let version = match response.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        v => return Err(Error::decode(format!("unsupported http version {v:?}"))),
    };

    let mut map = HeaderMap::with_capacity(response.headers.len());
    for h in response.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(Error::decode)?;
        let value = HeaderValue::from_bytes(h.value).map_err(Error::decode)?;
        map.append(name, value);
    }

    let _ = buf.split_to(consumed);

    Ok(Some(ResponseHead {
        status,
        version,
        headers: map,
    }))
}

/// How the response body is delimited on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyKind {
    /// No body bytes follow the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// Delimited by connection close.
    Eof,
}

impl BodyKind {
    /// Decides the framing from the request method and the response head,
    /// per RFC 7230 §3.3.3.
    pub(crate) fn of(method: &Method, head: &ResponseHead) -> Result<BodyKind> {
        if method == Method::HEAD
            || head.status.is_informational()
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyKind::Empty);
        }

        let chunked = head
            .headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(BodyKind::Chunked);
        }

        if let Some(value) = head.headers.get(header::CONTENT_LENGTH) {
            let len = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| Error::decode("invalid content-length"))?;
            return Ok(if len == 0 {
                BodyKind::Empty
            } else {
                BodyKind::Length(len)
            });
        }

        Ok(BodyKind::Eof)
    }
}

/// Encodes one chunk of a chunked request body.
pub(crate) fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    out.reserve(data.len() + 16);
    out.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

/// The terminal chunk of a chunked request body.
pub(crate) const CHUNKED_END: &[u8] = b"0\r\n\r\n";

/// The result of feeding buffered bytes to a [`BodyDecoder`].
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A run of body bytes.
    Data(Bytes),
    /// The buffer holds no complete unit; read more from the socket.
    NeedMore,
    /// The body is complete.
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkState {
    /// Expecting a chunk-size line.
    Size,
    /// Inside chunk data, `remaining` bytes left.
    Data,
    /// Expecting the CRLF that terminates a chunk's data.
    DataEnd,
    /// Saw the zero-size chunk; skipping trailers until the blank line.
    Trailers,
    Done,
}

/// Incremental decoder for one response body.
///
/// Driven by the response stream: it consumes from the connection's parse
/// buffer and reports when more socket reads are needed.
#[derive(Debug)]
pub(crate) struct BodyDecoder {
    kind: BodyKind,
    remaining: u64,
    chunk: ChunkState,
    eof: bool,
}

impl BodyDecoder {
    pub(crate) fn new(kind: BodyKind) -> BodyDecoder {
        BodyDecoder {
            kind,
            remaining: match kind {
                BodyKind::Length(n) => n,
                _ => 0,
            },
            chunk: ChunkState::Size,
            eof: matches!(kind, BodyKind::Empty),
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether a clean transport EOF is a legal end of this body.
    pub(crate) fn eof_delimited(&self) -> bool {
        matches!(self.kind, BodyKind::Eof)
    }

    /// Marks the body finished on transport EOF (close-delimited bodies).
    pub(crate) fn finish_on_eof(&mut self) {
        self.eof = true;
    }

    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded> {
        if self.eof {
            return Ok(Decoded::Eof);
        }
        match self.kind {
            BodyKind::Empty => Ok(Decoded::Eof),
            BodyKind::Length(_) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let take = (self.remaining).min(buf.len() as u64) as usize;
                let data = buf.split_to(take).freeze();
                self.remaining -= take as u64;
                if self.remaining == 0 {
                    self.eof = true;
                }
                Ok(Decoded::Data(data))
            }
            BodyKind::Eof => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                Ok(Decoded::Data(buf.split().freeze()))
            }
            BodyKind::Chunked => self.decode_chunked(buf),
        }
    }

    fn decode_chunked(&mut self, buf: &mut BytesMut) -> Result<Decoded> {
        loop {
            match self.chunk {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_HEAD_BYTES {
                            return Err(Error::decode("chunk size line too long"));
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    let line = buf.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    if size == 0 {
                        self.chunk = ChunkState::Trailers;
                    } else {
                        self.remaining = size;
                        self.chunk = ChunkState::Data;
                    }
                }
                ChunkState::Data => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let take = (self.remaining).min(buf.len() as u64) as usize;
                    let data = buf.split_to(take).freeze();
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.chunk = ChunkState::DataEnd;
                    }
                    return Ok(Decoded::Data(data));
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(Decoded::NeedMore);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(Error::decode("missing CRLF after chunk data"));
                    }
                    let _ = buf.split_to(2);
                    self.chunk = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_HEAD_BYTES {
                            return Err(Error::decode("chunk trailers too long"));
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    let line = buf.split_to(line_end + 2);
                    if line.len() == 2 {
                        self.chunk = ChunkState::Done;
                        self.eof = true;
                        return Ok(Decoded::Eof);
                    }
                }
                ChunkState::Done => {
                    self.eof = true;
                    return Ok(Decoded::Eof);
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    // Chunk extensions (";key=value") are tolerated and ignored.
    let text = std::str::from_utf8(line).map_err(Error::decode)?;
    let size_hex = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_hex, 16).map_err(|_| Error::decode("invalid chunk size"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> ResponseHead {
        let mut buf = BytesMut::from(raw.as_bytes());
        parse_head(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn serializes_request_head() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.test"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let mut buf = BytesMut::new();
        write_head(&mut buf, &Method::GET, "/index?q=1", &headers);

        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.starts_with("GET /index?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.test\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_response_head_incrementally() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Le"[..]);
        assert!(parse_head(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ngth: 5\r\n\r\nhello");
        let head = parse_head(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(
            head.headers.get(header::CONTENT_LENGTH).unwrap(),
            &HeaderValue::from_static("5")
        );
        // The body prefix stays in the buffer.
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn malformed_head_is_an_error() {
        let mut buf = BytesMut::from(&b"BOGUS NONSENSE\r\n\r\n"[..]);
        assert!(parse_head(&mut buf).is_err());
    }

    #[test]
    fn body_kind_rules() {
        let h = head("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(BodyKind::of(&Method::GET, &h).unwrap(), BodyKind::Length(5));
        assert_eq!(BodyKind::of(&Method::HEAD, &h).unwrap(), BodyKind::Empty);

        let h = head("HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(BodyKind::of(&Method::GET, &h).unwrap(), BodyKind::Empty);

        let h = head("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(BodyKind::of(&Method::GET, &h).unwrap(), BodyKind::Chunked);

        let h = head("HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(BodyKind::of(&Method::GET, &h).unwrap(), BodyKind::Eof);

        let h = head("HTTP/1.1 200 OK\r\nContent-Length: nope\r\n\r\n");
        assert!(BodyKind::of(&Method::GET, &h).is_err());
    }

    #[test]
    fn decodes_content_length_body() {
        let mut dec = BodyDecoder::new(BodyKind::Length(5));
        let mut buf = BytesMut::from(&b"hel"[..]);

        match dec.decode(&mut buf).unwrap() {
            Decoded::Data(d) => assert_eq!(&d[..], b"hel"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::NeedMore));

        buf.extend_from_slice(b"lo<next response>");
        match dec.decode(&mut buf).unwrap() {
            Decoded::Data(d) => assert_eq!(&d[..], b"lo"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(dec.is_eof());
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::Eof));
        // Pipeline residue is left untouched.
        assert_eq!(&buf[..], b"<next response>");
    }

    #[test]
    fn decodes_chunked_body() {
        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n"[..]);

        let mut collected = Vec::new();
        loop {
            match dec.decode(&mut buf).unwrap() {
                Decoded::Data(d) => collected.extend_from_slice(&d),
                Decoded::Eof => break,
                Decoded::NeedMore => panic!("decoder starved with bytes available"),
            }
        }
        assert_eq!(collected, b"hello world");
        assert!(dec.is_eof());
    }

    #[test]
    fn chunked_split_across_reads() {
        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"5\r"[..]);
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::NeedMore));

        buf.extend_from_slice(b"\nhe");
        match dec.decode(&mut buf).unwrap() {
            Decoded::Data(d) => assert_eq!(&d[..], b"he"),
            other => panic!("unexpected {other:?}"),
        }

        buf.extend_from_slice(b"llo\r\n0\r\n");
        match dec.decode(&mut buf).unwrap() {
            Decoded::Data(d) => assert_eq!(&d[..], b"llo"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::NeedMore));

        buf.extend_from_slice(b"\r\n");
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::Eof));
    }

    #[test]
    fn bad_chunk_framing_is_an_error() {
        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(dec.decode(&mut buf).is_err());

        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"1\r\nXYY"[..]);
        let _ = dec.decode(&mut buf).unwrap();
        assert!(dec.decode(&mut buf).is_err());
    }

    #[test]
    fn eof_delimited_body() {
        let mut dec = BodyDecoder::new(BodyKind::Eof);
        let mut buf = BytesMut::from(&b"data"[..]);
        match dec.decode(&mut buf).unwrap() {
            Decoded::Data(d) => assert_eq!(&d[..], b"data"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::NeedMore));
        assert!(dec.eof_delimited());
        dec.finish_on_eof();
        assert!(matches!(dec.decode(&mut buf).unwrap(), Decoded::Eof));
    }

    #[test]
    fn chunk_encoding() {
        let mut out = BytesMut::new();
        encode_chunk(b"hello", &mut out);
        assert_eq!(&out[..], b"5\r\nhello\r\n");
        assert_eq!(CHUNKED_END, b"0\r\n\r\n");
    }
}
