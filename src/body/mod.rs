//! Echo body model
//!
//! This module defines the JSON document the HTTP echo handler sends back
//! for every ordinary request, together with helpers test code can use to
//! decode it from a response.

use crate::http::EchoRequest;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(test)]
mod tests;

/// Errors produced while decoding an echo body
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid echo body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read echo body: {0}")]
    Io(#[from] std::io::Error),
}

/// The echoed representation of one HTTP request
///
/// Serialized as a JSON object with the fields `method`, `path`, `url`,
/// `host` and `request`. The `request` field carries the request line and
/// headers exactly as they arrived on the wire.
///
/// # Examples
///
/// ```
/// use echo_service::body::{self, EchoBody};
///
/// let body = EchoBody::new("GET", "/a", "/a?b=c", "localhost", "GET /a?b=c HTTP/1.1\r\n\r\n");
/// let bytes = body::encode(&body);
/// assert_eq!(body::decode(&bytes).unwrap(), body);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoBody {
    method: String,
    path: String,
    url: String,
    host: String,
    request: String,
}

impl EchoBody {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        url: impl Into<String>,
        host: impl Into<String>,
        request: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            url: url.into(),
            host: host.into(),
            request: request.into(),
        }
    }

    /// Builds the echo body for a parsed request
    pub fn from_request(request: &EchoRequest) -> Self {
        Self {
            method: request.method().as_str().to_string(),
            path: request.path().into_owned(),
            url: request.url(),
            host: request.host().to_string(),
            request: String::from_utf8_lossy(request.raw_head()).into_owned(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The raw request line and headers
    pub fn request(&self) -> &str {
        &self.request
    }
}

/// Serializes an echo body to JSON
pub fn encode(body: &EchoBody) -> Bytes {
    // A struct of plain strings always serializes.
    Bytes::from(serde_json::to_vec(body).unwrap_or_default())
}

/// Deserializes an echo body from JSON
///
/// Missing fields are left empty; anything that is not a JSON object is
/// rejected.
pub fn decode(data: &[u8]) -> Result<EchoBody, DecodeError> {
    Ok(serde_json::from_slice(data)?)
}

/// Decodes the first JSON value read from `reader`
pub fn decode_reader<R: Read>(reader: R) -> Result<EchoBody, DecodeError> {
    let mut stream = serde_json::Deserializer::from_reader(reader).into_iter::<EchoBody>();
    match stream.next() {
        Some(body) => Ok(body?),
        None => Err(DecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty echo body",
        ))),
    }
}

/// Decodes an echo body and releases the stream
///
/// The reader is taken by value and dropped before this function returns,
/// whatever the decode result.
pub fn decode_and_close<R: Read>(reader: R) -> Result<EchoBody, DecodeError> {
    // decode_reader owns the reader; it is dropped when that call returns.
    decode_reader(reader)
}

/// Async counterpart of [`decode_and_close`]
///
/// Reads the stream to its end, drops it, then decodes.
pub async fn decode_and_close_async<R: AsyncRead + Unpin>(
    mut reader: R,
) -> Result<EchoBody, DecodeError> {
    let mut data = Vec::new();
    let read = reader.read_to_end(&mut data).await;
    drop(reader);
    read?;
    decode(&data)
}
