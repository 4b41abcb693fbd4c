use super::chunked::decode_chunked;
use crate::security::{ResourceLimits, SizeError, SizeValidator};
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, EXPECT, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const READ_CHUNK: usize = 4096;

/// Errors raised while reading an HTTP request off a connection
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Request header section too large: {0}")]
    HeadersTooLarge(SizeError),
    #[error("Request body too large: {0}")]
    BodyTooLarge(SizeError),
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
    #[error("Incomplete request")]
    Incomplete,
    #[error("Timed out reading request")]
    Timeout,
}

impl RequestError {
    /// Status to answer with, if the peer can still be answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            Self::HeadersTooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::UnsupportedTransferEncoding(_) => Some(StatusCode::NOT_IMPLEMENTED),
            Self::Timeout => Some(StatusCode::REQUEST_TIMEOUT),
            Self::Io(_) | Self::Incomplete => None,
        }
    }
}

/// A parsed HTTP request as seen by the echo handlers
#[derive(Debug, Clone)]
pub struct EchoRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    raw_head: Bytes,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl EchoRequest {
    /// Parses a request held entirely in memory
    ///
    /// Everything after the header section is taken as the body, without
    /// looking at framing headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use echo_service::http::EchoRequest;
    ///
    /// let request = EchoRequest::parse(b"GET /a?b=c HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    /// assert_eq!(request.path(), "/a");
    /// assert_eq!(request.url(), "/a?b=c");
    /// assert_eq!(request.host(), "localhost");
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, RequestError> {
        let head = parse_head(data, ResourceLimits::default().max_headers)?
            .ok_or(RequestError::Incomplete)?;
        let len = head.len;
        Ok(head.into_request(
            Bytes::copy_from_slice(&data[..len]),
            Bytes::copy_from_slice(&data[len..]),
            None,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the named header, if it is valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request line and headers exactly as received, blank line included
    pub fn raw_head(&self) -> &[u8] {
        &self.raw_head
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// The percent-decoded path component of the request target
    ///
    /// Escapes that do not decode to UTF-8 are replaced lossily.
    pub fn path(&self) -> Cow<'_, str> {
        percent_decode_str(self.uri.path()).decode_utf8_lossy()
    }

    /// The request target as it appeared on the request line
    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// Authority of an absolute-form target, else the `Host` header
    pub fn host(&self) -> &str {
        self.uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| self.header(HOST.as_str()))
            .unwrap_or("")
    }

    /// Whether the connection may carry another request after this one
    pub fn keep_alive(&self) -> bool {
        let mut close = false;
        let mut keep_alive = false;
        for token in header_tokens(&self.headers, &CONNECTION) {
            close |= token.eq_ignore_ascii_case("close");
            keep_alive |= token.eq_ignore_ascii_case("keep-alive");
        }
        if close {
            return false;
        }
        self.version == Version::HTTP_11 || keep_alive
    }
}

/// Comma-separated tokens across every value of a header
pub(crate) fn header_tokens<'a>(
    headers: &'a HeaderMap,
    name: &HeaderName,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

struct ParsedHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    len: usize,
}

impl ParsedHead {
    fn into_request(self, raw_head: Bytes, body: Bytes, peer_addr: Option<SocketAddr>) -> EchoRequest {
        EchoRequest {
            method: self.method,
            uri: self.uri,
            version: self.version,
            headers: self.headers,
            raw_head,
            body,
            peer_addr,
        }
    }
}

fn parse_head(buf: &[u8], max_headers: usize) -> Result<Option<ParsedHead>, RequestError> {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(RequestError::HeadersTooLarge(SizeError::TooLarge {
                actual: max_headers + 1,
                max: max_headers,
            }));
        }
        Err(e) => return Err(RequestError::Malformed(format!("Failed to parse headers: {e}"))),
    };

    let method = req.method.unwrap_or_default();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RequestError::Malformed(format!("invalid method {method:?}")))?;
    let target = req.path.unwrap_or_default();
    let uri = target
        .parse::<Uri>()
        .map_err(|e| RequestError::Malformed(format!("invalid request target {target:?}: {e}")))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        other => return Err(RequestError::Malformed(format!("unsupported HTTP version {other:?}"))),
    };

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| RequestError::Malformed(format!("invalid header name {:?}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| RequestError::Malformed(format!("invalid value for header {}", header.name)))?;
        header_map.append(name, value);
    }

    Ok(Some(ParsedHead {
        method,
        uri,
        version,
        headers: header_map,
        len,
    }))
}

enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

fn body_framing(headers: &HeaderMap) -> Result<BodyFraming, RequestError> {
    if headers.contains_key(TRANSFER_ENCODING) {
        let codings: Vec<&str> = header_tokens(headers, &TRANSFER_ENCODING).collect();
        return match codings.last() {
            Some(last) if last.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
            _ => Err(RequestError::UnsupportedTransferEncoding(codings.join(", "))),
        };
    }

    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| RequestError::Malformed("invalid Content-Length".to_string()))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(RequestError::Malformed("conflicting Content-Length values".to_string()));
        }
        length = Some(parsed);
    }

    Ok(match length {
        Some(0) | None => BodyFraming::None,
        Some(n) => BodyFraming::Length(n),
    })
}

/// One client connection and its unread input
///
/// Requests are read one at a time; bytes received past the end of a
/// request stay buffered for the next one (or for a WebSocket upgrade).
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    peer_addr: Option<SocketAddr>,
    limits: ResourceLimits,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer_addr: Option<SocketAddr>, limits: ResourceLimits) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            peer_addr,
            limits,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Releases the stream together with any bytes read but not consumed
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.buffer)
    }

    /// Reads the next request
    ///
    /// Returns `Ok(None)` when the peer closes the connection, or stays idle
    /// past the read timeout, before sending any part of a request.
    pub async fn read_request(&mut self) -> Result<Option<EchoRequest>, RequestError> {
        let head_validator = self.limits.head_validator();

        let head = loop {
            if let Some(head) = parse_head(&self.buffer, self.limits.max_headers)? {
                head_validator
                    .validate_size(head.len)
                    .map_err(RequestError::HeadersTooLarge)?;
                break head;
            }
            head_validator
                .validate_size(self.buffer.len())
                .map_err(RequestError::HeadersTooLarge)?;

            match timeout(self.limits.read_timeout, self.fill()).await {
                Ok(Ok(0)) if self.buffer.is_empty() => return Ok(None),
                Ok(Ok(0)) => return Err(RequestError::Incomplete),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if self.buffer.is_empty() => return Ok(None),
                Err(_) => return Err(RequestError::Timeout),
            }
        };

        let raw_head = self.buffer.split_to(head.len).freeze();
        let framing = body_framing(&head.headers)?;

        if !matches!(framing, BodyFraming::None) && self.buffer.is_empty() && expects_continue(&head) {
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            self.stream.flush().await?;
        }

        let body = match framing {
            BodyFraming::None => Bytes::new(),
            BodyFraming::Length(len) => {
                self.limits
                    .body_validator()
                    .validate_size(len)
                    .map_err(RequestError::BodyTooLarge)?;
                while self.buffer.len() < len {
                    self.read_more().await?;
                }
                self.buffer.split_to(len).freeze()
            }
            BodyFraming::Chunked => self.read_chunked_body().await?,
        };

        Ok(Some(head.into_request(raw_head, body, self.peer_addr)))
    }

    async fn read_chunked_body(&mut self) -> Result<Bytes, RequestError> {
        let validator = self.limits.body_validator();
        // Chunk-size lines and extensions are bounded by the head limit.
        let wire_validator = SizeValidator::new(
            self.limits.max_body_size.saturating_add(self.limits.max_head_size),
        );

        loop {
            if let Some((body, consumed)) = decode_chunked(&self.buffer, &validator)? {
                self.buffer.advance(consumed);
                return Ok(Bytes::from(body));
            }
            wire_validator
                .validate_size(self.buffer.len())
                .map_err(RequestError::BodyTooLarge)?;
            self.read_more().await?;
        }
    }

    async fn read_more(&mut self) -> Result<(), RequestError> {
        match timeout(self.limits.read_timeout, self.fill()).await {
            Ok(Ok(0)) => Err(RequestError::Incomplete),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RequestError::Timeout),
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.buffer.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.buffer).await
    }
}

fn expects_continue(head: &ParsedHead) -> bool {
    head.version == Version::HTTP_11
        && head
            .headers
            .get(EXPECT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
}
