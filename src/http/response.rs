//! Response writers
//!
//! [`ResponseWriter`] is the seam between the echo handler and the
//! transport. A writer fixes the status on the first `write_header` call
//! (or implicitly on the first `write`), snapshots the headers at that
//! moment, and exposes an explicit flush only if its transport supports
//! one. [`ConnResponse`] writes HTTP/1.x to a stream; [`ResponseRecorder`]
//! keeps everything in memory for tests.

use super::chunked::{LAST_CHUNK, encode_chunk};
use super::request::EchoRequest;
use crate::config::ServerConfig;
use async_trait::async_trait;
use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE, SERVER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Explicit flush capability of a response transport
#[async_trait]
pub trait Flusher: Send {
    /// Sends everything written so far to the peer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Destination for one HTTP response
#[async_trait]
pub trait ResponseWriter: Send {
    /// Headers to send; changes after the status is fixed have no effect
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Fixes the response status; only the first call counts
    fn write_header(&mut self, status: StatusCode);

    /// Appends body bytes, fixing the status at 200 if not yet fixed
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// The explicit flush capability, if the transport has one
    fn flusher(&mut self) -> Option<&mut dyn Flusher>;
}

/// Replies with a plain-text error message
pub async fn write_error(
    writer: &mut dyn ResponseWriter,
    message: &str,
    status: StatusCode,
) -> io::Result<()> {
    let headers = writer.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    writer.write_header(status);
    writer.write(format!("{message}\n").as_bytes()).await
}

/// Whether a response with this status may carry a body
pub fn body_allowed(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Formats a header name the way most servers put it on the wire (`X-Test`)
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Whether a status is sent as an interim response ahead of the final one
///
/// `101 Switching Protocols` ends the exchange and counts as final.
pub fn is_interim(status: StatusCode) -> bool {
    status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS
}

#[derive(Debug, Default)]
struct HeadState {
    headers: HeaderMap,
    committed: Option<(StatusCode, HeaderMap)>,
    interim: Vec<(StatusCode, HeaderMap)>,
}

impl HeadState {
    fn write_header(&mut self, status: StatusCode) {
        if let Some((current, _)) = &self.committed {
            warn!(current = current.as_u16(), ignored = status.as_u16(), "superfluous write_header call");
            return;
        }
        if is_interim(status) {
            self.interim.push((status, self.headers.clone()));
            return;
        }
        self.committed = Some((status, self.headers.clone()));
    }

    fn commit(&mut self) -> StatusCode {
        if self.committed.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.status()
    }

    fn status(&self) -> StatusCode {
        self.committed
            .as_ref()
            .map(|(status, _)| *status)
            .unwrap_or(StatusCode::OK)
    }

    fn headers(&self) -> &HeaderMap {
        self.committed
            .as_ref()
            .map(|(_, headers)| headers)
            .unwrap_or(&self.headers)
    }
}

/// In-memory response writer
///
/// # Examples
///
/// ```
/// use echo_service::http::{ResponseRecorder, ResponseWriter};
/// use http::StatusCode;
///
/// # tokio_test::block_on(async {
/// let mut recorder = ResponseRecorder::new();
/// recorder.write_header(StatusCode::CREATED);
/// recorder.write(b"done").await.unwrap();
/// assert_eq!(recorder.status(), StatusCode::CREATED);
/// assert_eq!(recorder.body(), b"done");
/// # });
/// ```
#[derive(Debug)]
pub struct ResponseRecorder {
    head: HeadState,
    body: BytesMut,
    flush_supported: bool,
    flush_count: usize,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self {
            head: HeadState::default(),
            body: BytesMut::new(),
            flush_supported: true,
            flush_count: 0,
        }
    }

    /// A recorder whose transport has no explicit flush
    pub fn without_flush() -> Self {
        Self {
            flush_supported: false,
            ..Self::new()
        }
    }

    /// The fixed status, or 200 if none was written
    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    pub fn header_written(&self) -> bool {
        self.head.committed.is_some()
    }

    /// Headers as they would have gone out
    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// Interim (1xx) statuses sent before the final one, in order
    pub fn interim_statuses(&self) -> Vec<StatusCode> {
        self.head.interim.iter().map(|(status, _)| *status).collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count
    }
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Flusher for ResponseRecorder {
    async fn flush(&mut self) -> io::Result<()> {
        self.head.commit();
        self.flush_count += 1;
        Ok(())
    }
}

#[async_trait]
impl ResponseWriter for ResponseRecorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.head.write_header(status);
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let status = self.head.commit();
        if !body_allowed(status) {
            debug!(status = status.as_u16(), "dropping body for bodiless status");
            return Ok(());
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flusher> {
        if self.flush_supported {
            Some(self as &mut dyn Flusher)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    CloseDelimited,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireState {
    Buffering,
    Streaming { chunked: bool },
}

/// HTTP/1.x response written to a connection
///
/// The body is buffered and sent with a `Content-Length` when the
/// response finishes. A flush, or a body larger than the configured
/// buffer size, switches to chunked transfer coding (close-delimited for
/// HTTP/1.0 peers).
pub struct ConnResponse<'a, S> {
    stream: &'a mut S,
    head: HeadState,
    version: Version,
    head_only: bool,
    keep_alive: bool,
    server_name: Option<&'a str>,
    buffer_limit: usize,
    body: BytesMut,
    state: WireState,
}

impl<'a, S> ConnResponse<'a, S>
where
    S: AsyncWrite + Unpin + Send,
{
    pub fn new(stream: &'a mut S, request: &EchoRequest, config: &'a ServerConfig) -> Self {
        Self {
            stream,
            head: HeadState::default(),
            version: request.version(),
            head_only: *request.method() == Method::HEAD,
            keep_alive: request.keep_alive(),
            server_name: config.server_name.as_deref(),
            buffer_limit: config.buffer_size,
            body: BytesMut::new(),
            state: WireState::Buffering,
        }
    }

    /// Completes the response
    ///
    /// Returns whether the connection can be reused for another request.
    pub async fn finish(mut self) -> io::Result<bool> {
        let status = self.head.commit();
        match self.state {
            WireState::Buffering => {
                let framing = if body_allowed(status) {
                    Framing::Length(self.body.len())
                } else {
                    Framing::Empty
                };
                self.send_head(framing).await?;
                if framing != Framing::Empty && !self.head_only && !self.body.is_empty() {
                    let body = self.body.split().freeze();
                    self.stream.write_all(&body).await?;
                }
            }
            WireState::Streaming { chunked: true } => {
                if !self.head_only {
                    self.stream.write_all(LAST_CHUNK).await?;
                }
            }
            WireState::Streaming { chunked: false } => {}
        }
        self.stream.flush().await?;
        Ok(self.keep_alive)
    }

    async fn start_streaming(&mut self) -> io::Result<()> {
        let status = self.head.commit();
        let framing = if !body_allowed(status) {
            Framing::Empty
        } else if self.version == Version::HTTP_11 {
            Framing::Chunked
        } else {
            Framing::CloseDelimited
        };
        self.send_head(framing).await?;

        let chunked = framing == Framing::Chunked;
        self.state = WireState::Streaming { chunked };
        let pending = self.body.split().freeze();
        if framing != Framing::Empty && !pending.is_empty() {
            self.write_body_bytes(&pending, chunked).await?;
        }
        Ok(())
    }

    async fn write_body_bytes(&mut self, data: &[u8], chunked: bool) -> io::Result<()> {
        if self.head_only || data.is_empty() {
            return Ok(());
        }
        if chunked {
            self.stream.write_all(&encode_chunk(data)).await
        } else {
            self.stream.write_all(data).await
        }
    }

    async fn send_interim(&mut self) -> io::Result<()> {
        let interim = std::mem::take(&mut self.head.interim);
        // HTTP/1.0 peers do not understand 1xx responses.
        if self.version != Version::HTTP_11 {
            return Ok(());
        }
        for (status, headers) in interim {
            let mut out = status_line("HTTP/1.1", status);
            for (name, value) in &headers {
                if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING || *name == CONNECTION {
                    continue;
                }
                push_header(&mut out, name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
            }
            out.push_str("\r\n");
            self.stream.write_all(out.as_bytes()).await?;
        }
        Ok(())
    }

    async fn send_head(&mut self, framing: Framing) -> io::Result<()> {
        self.send_interim().await?;

        let status = self.head.status();
        let headers = self.head.headers();

        if header_has_token(headers, &CONNECTION, "close") {
            self.keep_alive = false;
        }
        // The peer expects another protocol after a 101.
        if framing == Framing::CloseDelimited || status == StatusCode::SWITCHING_PROTOCOLS {
            self.keep_alive = false;
        }

        let version = if self.version == Version::HTTP_10 { "HTTP/1.0" } else { "HTTP/1.1" };
        let mut out = status_line(version, status);

        for (name, value) in headers {
            // Framing is decided here, not by the handler.
            if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING || *name == CONNECTION {
                continue;
            }
            push_header(&mut out, name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
        if !headers.contains_key(DATE) {
            let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            push_header(&mut out, DATE.as_str(), &date);
        }
        if let Some(server) = self.server_name.filter(|_| !headers.contains_key(SERVER)) {
            push_header(&mut out, SERVER.as_str(), server);
        }
        match framing {
            Framing::Length(len) => push_header(&mut out, CONTENT_LENGTH.as_str(), &len.to_string()),
            Framing::Chunked => push_header(&mut out, TRANSFER_ENCODING.as_str(), "chunked"),
            Framing::CloseDelimited | Framing::Empty => {}
        }
        if !self.keep_alive {
            push_header(&mut out, CONNECTION.as_str(), "close");
        } else if self.version == Version::HTTP_10 {
            push_header(&mut out, CONNECTION.as_str(), "keep-alive");
        }
        out.push_str("\r\n");

        self.stream.write_all(out.as_bytes()).await
    }
}

fn status_line(version: &str, status: StatusCode) -> String {
    format!(
        "{version} {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(&canonical_header_name(name));
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    super::request::header_tokens(headers, name).any(|t| t.eq_ignore_ascii_case(token))
}

#[async_trait]
impl<S> Flusher for ConnResponse<'_, S>
where
    S: AsyncWrite + Unpin + Send,
{
    async fn flush(&mut self) -> io::Result<()> {
        if self.state == WireState::Buffering {
            self.start_streaming().await?;
        }
        self.stream.flush().await
    }
}

#[async_trait]
impl<S> ResponseWriter for ConnResponse<'_, S>
where
    S: AsyncWrite + Unpin + Send,
{
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.head.write_header(status);
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let status = self.head.commit();
        if !body_allowed(status) {
            debug!(status = status.as_u16(), "dropping body for bodiless status");
            return Ok(());
        }
        match self.state {
            WireState::Buffering => {
                self.body.extend_from_slice(data);
                if self.body.len() > self.buffer_limit {
                    self.start_streaming().await?;
                }
                Ok(())
            }
            WireState::Streaming { chunked } => self.write_body_bytes(data, chunked).await,
        }
    }

    fn flusher(&mut self) -> Option<&mut dyn Flusher> {
        Some(self as &mut dyn Flusher)
    }
}

/// Writes a complete plain-text response outside of any handler
///
/// Used for requests that could not be parsed; the connection is always
/// marked for closing.
pub async fn write_plain_response<S>(stream: &mut S, status: StatusCode, message: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
