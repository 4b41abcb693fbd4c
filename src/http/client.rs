use super::chunked::decode_chunked;
use super::response::{body_allowed, is_interim};
use crate::body::{self, DecodeError, EchoBody};
use crate::security::SizeValidator;
use crate::{EchoError, Result};
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// A request to send with [`HttpEchoClient`]
#[derive(Debug, Clone)]
pub struct ClientRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ClientRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn to_wire(&self, default_host: &str) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.target);
        if !self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("host")) {
            out.push_str(&format!("Host: {default_host}\r\n"));
        }
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");

        let mut wire = out.into_bytes();
        wire.extend_from_slice(&self.body);
        wire
    }
}

/// A response received by [`HttpEchoClient`]
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Whether the body arrived with chunked transfer coding
    pub chunked: bool,
}

impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decodes the body as an echo body
    pub fn echo_body(&self) -> std::result::Result<EchoBody, DecodeError> {
        body::decode_reader(&self.body[..])
    }
}

/// HTTP/1.1 client for talking to the echo server in tests
///
/// Keeps the connection open between requests.
///
/// # Examples
///
/// ```no_run
/// use echo_service::http::{ClientRequest, HttpEchoClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let addr = "127.0.0.1:8080".parse()?;
///     let mut client = HttpEchoClient::connect(addr).await?;
///
///     let response = client
///         .send(ClientRequest::get("/hello").header("Expect-Status", "201"))
///         .await?;
///     assert_eq!(response.status.as_u16(), 201);
///     println!("Server saw: {}", response.echo_body()?.request());
///     Ok(())
/// }
/// ```
pub struct HttpEchoClient {
    stream: TcpStream,
    buffer: BytesMut,
    host: String,
    read_timeout: Duration,
}

impl HttpEchoClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| EchoError::Protocol(format!("Failed to connect to {addr}: {e}")))?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            host: addr.to_string(),
            read_timeout: Duration::from_secs(5),
        })
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub async fn get(&mut self, target: &str) -> Result<ClientResponse> {
        self.send(ClientRequest::get(target)).await
    }

    pub async fn send(&mut self, request: ClientRequest) -> Result<ClientResponse> {
        let head_only = request.method.eq_ignore_ascii_case("HEAD");
        let wire = request.to_wire(&self.host);
        self.send_raw(&wire, head_only).await
    }

    /// Sends bytes as-is and reads one response
    pub async fn send_raw(&mut self, wire: &[u8], head_only: bool) -> Result<ClientResponse> {
        self.stream.write_all(wire).await?;
        self.stream.flush().await?;
        self.read_response(head_only).await
    }

    async fn read_response(&mut self, head_only: bool) -> Result<ClientResponse> {
        loop {
            let (status, headers) = self.read_head().await?;
            // Interim responses such as 100 Continue precede the real one.
            if is_interim(status) {
                continue;
            }

            if head_only || !body_allowed(status) {
                return Ok(ClientResponse { status, headers, body: Bytes::new(), chunked: false });
            }

            let chunked = headers
                .get(TRANSFER_ENCODING)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
            let body = if chunked {
                self.read_chunked().await?
            } else if let Some(len) = content_length(&headers)? {
                while self.buffer.len() < len {
                    self.fill_or_eof().await?;
                }
                self.buffer.split_to(len).freeze()
            } else {
                while self.fill().await? > 0 {}
                self.buffer.split().freeze()
            };

            return Ok(ClientResponse { status, headers, body, chunked });
        }
    }

    async fn read_head(&mut self) -> Result<(StatusCode, HeaderMap)> {
        loop {
            let mut raw_headers = [httparse::EMPTY_HEADER; 64];
            let mut response = httparse::Response::new(&mut raw_headers);
            match response.parse(&self.buffer) {
                Ok(httparse::Status::Complete(len)) => {
                    let status = StatusCode::from_u16(response.code.unwrap_or_default())
                        .map_err(|e| EchoError::Protocol(format!("invalid status: {e}")))?;
                    let mut headers = HeaderMap::new();
                    for header in response.headers.iter() {
                        let name = HeaderName::from_bytes(header.name.as_bytes())
                            .map_err(|e| EchoError::Protocol(format!("invalid header name: {e}")))?;
                        let value = HeaderValue::from_bytes(header.value)
                            .map_err(|e| EchoError::Protocol(format!("invalid header value: {e}")))?;
                        headers.append(name, value);
                    }
                    self.buffer.advance(len);
                    return Ok((status, headers));
                }
                Ok(httparse::Status::Partial) => {}
                Err(e) => return Err(EchoError::Protocol(format!("Failed to parse response: {e}"))),
            }
            self.fill_or_eof().await?;
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes> {
        let validator = SizeValidator::new(MAX_RESPONSE_SIZE);
        loop {
            if let Some((body, consumed)) = decode_chunked(&self.buffer, &validator)? {
                self.buffer.advance(consumed);
                return Ok(Bytes::from(body));
            }
            self.fill_or_eof().await?;
        }
    }

    async fn fill_or_eof(&mut self) -> Result<()> {
        match self.fill().await? {
            0 => Err(EchoError::Protocol("connection closed mid-response".to_string())),
            _ => Ok(()),
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        self.buffer.reserve(4096);
        timeout(self.read_timeout, self.stream.read_buf(&mut self.buffer))
            .await
            .map_err(|_| EchoError::Timeout("Read timeout".to_string()))?
            .map_err(EchoError::Io)
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>> {
    headers
        .get(CONTENT_LENGTH)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| EchoError::Protocol("invalid Content-Length".to_string()))
        })
        .transpose()
}
