use super::handshake::Upgrader;
use crate::config::ServerConfig;
use crate::http::{ConnResponse, Connection, EchoRequest, ResponseWriter, write_error};
use futures_util::{SinkExt, StreamExt};
use http::header::CONNECTION;
use http::{HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

/// Upgrades the connection and echoes frames until it closes
///
/// A refused handshake is answered with a 500 carrying the reason. Socket
/// errors end only this connection and are logged.
pub async fn serve_websocket<S>(
    upgrader: &Upgrader,
    request: &EchoRequest,
    mut connection: Connection<S>,
    config: &ServerConfig,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let accept_key = match upgrader.accept_key(request) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            let mut response = ConnResponse::new(connection.stream_mut(), request, config);
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
            write_error(&mut response, &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).await?;
            response.finish().await?;
            return Ok(());
        }
    };

    let socket = upgrader.upgrade(connection, &accept_key).await?;
    match echo_frames(socket).await {
        Ok(echoed) => debug!(echoed, "WebSocket connection closed"),
        Err(e) => warn!(error = %e, "Socket error"),
    }
    Ok(())
}

/// Sends every text and binary message back unchanged, in order
///
/// Returns the number of messages echoed once the peer closes.
pub async fn echo_frames<S>(mut socket: WebSocketStream<S>) -> Result<u64, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut echoed = 0;
    while let Some(message) = socket.next().await {
        match message {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                socket.send(message).await?;
                echoed += 1;
            }
            Ok(Message::Close(frame)) => {
                // The close reply goes out on the next poll.
                debug!(?frame, "Close frame received");
            }
            Ok(_) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(echoed)
}
