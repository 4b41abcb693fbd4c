use crate::config::WebSocketSettings;
use crate::http::{Connection, EchoRequest};
use http::header::{SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION};
use http::{Method, Version};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tracing::debug;

/// Reasons a WebSocket upgrade is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("websocket: request method is not GET")]
    MethodNotGet,
    #[error("websocket: upgrade requires HTTP/1.1")]
    UnsupportedHttpVersion,
    #[error("websocket: unsupported version: 13 not found in 'Sec-Websocket-Version' header")]
    UnsupportedVersion,
    #[error("websocket: not a websocket handshake: 'Sec-WebSocket-Key' header is missing or blank")]
    MissingKey,
}

/// Performs server-side WebSocket handshakes
///
/// Holds the transport limits applied to every upgraded connection. One
/// instance is shared by all connections.
#[derive(Debug, Clone)]
pub struct Upgrader {
    config: WebSocketConfig,
}

impl Upgrader {
    pub fn new(settings: &WebSocketSettings) -> Self {
        let mut config = WebSocketConfig::default();
        config.max_message_size = settings.max_message_size;
        config.max_frame_size = settings.max_frame_size;
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Checks the upgrade request and returns the `Sec-WebSocket-Accept` value
    pub fn accept_key(&self, request: &EchoRequest) -> Result<String, HandshakeError> {
        if *request.method() != Method::GET {
            return Err(HandshakeError::MethodNotGet);
        }
        if request.version() != Version::HTTP_11 {
            return Err(HandshakeError::UnsupportedHttpVersion);
        }
        if request.header(SEC_WEBSOCKET_VERSION.as_str()).map(str::trim) != Some("13") {
            return Err(HandshakeError::UnsupportedVersion);
        }
        let key = request
            .header(SEC_WEBSOCKET_KEY.as_str())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(HandshakeError::MissingKey)?;
        Ok(derive_accept_key(key.as_bytes()))
    }

    /// Sends `101 Switching Protocols` and takes over the connection
    ///
    /// Bytes the client sent after the request head are handed to the
    /// WebSocket stream.
    pub async fn upgrade<S>(
        &self,
        connection: Connection<S>,
        accept_key: &str,
    ) -> std::io::Result<WebSocketStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut stream, leftover) = connection.into_parts();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept_key}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        debug!(leftover = leftover.len(), "WebSocket upgraded");
        Ok(WebSocketStream::from_partially_read(
            stream,
            leftover.to_vec(),
            Role::Server,
            Some(self.config.clone()),
        )
        .await)
    }
}
