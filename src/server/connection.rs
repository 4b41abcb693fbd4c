use crate::Result;
use crate::dispatch::Dispatcher;
use crate::http::{Connection, write_plain_response};
use crate::security::ResourceLimits;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long unread input is drained after an error response
const LINGER: Duration = Duration::from_millis(500);

/// Serves requests on one connection until it closes or is upgraded
///
/// Framing errors that still allow an answer get a plain-text error
/// response, after which the connection is closed.
pub async fn serve_connection<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    dispatcher: &Dispatcher,
    limits: ResourceLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut connection = Connection::new(stream, peer_addr, limits);
    let mut served: u64 = 0;

    loop {
        let request = match connection.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(served, "Client closed connection");
                break;
            }
            Err(e) => {
                match e.status() {
                    Some(status) => {
                        warn!(error = %e, status = status.as_u16(), "Rejecting request");
                        let stream = connection.stream_mut();
                        write_plain_response(stream, status, &e.to_string()).await?;
                        linger_close(stream).await;
                    }
                    None => debug!(error = %e, served, "Connection ended mid-request"),
                }
                break;
            }
        };

        served += 1;
        match dispatcher.dispatch(request, connection).await? {
            Some(next) => connection = next,
            None => break,
        }
    }

    Ok(())
}

/// Half-closes the stream and discards what the peer is still sending
///
/// Closing with unread input would reset the connection and could destroy
/// the error response before the peer reads it.
async fn linger_close<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut discard = [0u8; 4096];
    let drain = async {
        while let Ok(n) = stream.read(&mut discard).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = timeout(LINGER, drain).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dispatch::BufferedObserver;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn dispatcher(observer: Arc<BufferedObserver>) -> Dispatcher {
        Dispatcher::new(Arc::new(ServerConfig::default()), observer)
    }

    #[tokio::test]
    async fn test_pipelined_requests_share_connection() {
        let observer = Arc::new(BufferedObserver::new());
        let dispatcher = dispatcher(observer.clone());
        let (mut client, server) = duplex(64 * 1024);

        client
            .write_all(
                b"GET /first HTTP/1.1\r\nHost: h\r\n\r\nGET /second HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        serve_connection(server, None, &dispatcher, ResourceLimits::default())
            .await
            .unwrap();

        let mut wire = String::new();
        client.read_to_string(&mut wire).await.unwrap();
        assert_eq!(wire.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(wire.contains("\"path\":\"/first\""));
        assert!(wire.contains("\"path\":\"/second\""));

        let urls: Vec<_> = observer.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, ["/first", "/second"]);
    }

    #[tokio::test]
    async fn test_informational_status_still_gets_final_response() {
        let dispatcher = dispatcher(Arc::new(BufferedObserver::new()));
        let (mut client, server) = duplex(64 * 1024);

        client
            .write_all(
                b"GET /x HTTP/1.1\r\nHost: h\r\nExpect-Status: 103\r\n\r\nGET /y HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        serve_connection(server, None, &dispatcher, ResourceLimits::default())
            .await
            .unwrap();

        let mut wire = String::new();
        client.read_to_string(&mut wire).await.unwrap();
        assert!(wire.starts_with("HTTP/1.1 103 "));
        assert_eq!(wire.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(wire.contains("\"path\":\"/x\""));
        assert!(wire.contains("\"path\":\"/y\""));
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let observer = Arc::new(BufferedObserver::new());
        let dispatcher = dispatcher(observer.clone());
        let (mut client, server) = duplex(64 * 1024);

        client.write_all(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await.unwrap();
        serve_connection(server, None, &dispatcher, ResourceLimits::default())
            .await
            .unwrap();

        let mut wire = String::new();
        client.read_to_string(&mut wire).await.unwrap();
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(observer.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_request_closes_quietly() {
        let dispatcher = dispatcher(Arc::new(BufferedObserver::new()));
        let (mut client, server) = duplex(64 * 1024);

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        serve_connection(server, None, &dispatcher, ResourceLimits::default())
            .await
            .unwrap();

        let mut wire = Vec::new();
        client.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }
}
