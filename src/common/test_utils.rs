use crate::config::ServerConfig;
use crate::dispatch::RequestObserver;
use crate::server::EchoServer;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// An echo server running on an ephemeral port
pub struct TestServer {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL for `path` on this server
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Stops the accept loop and waits for it to return
    pub async fn shutdown(self) -> Result<()> {
        // The accept loop subscribes once it starts running.
        while self.shutdown.send(()).is_err() && !self.handle.is_finished() {
            tokio::task::yield_now().await;
        }
        self.handle.await?
    }
}

/// Starts a server for tests on `127.0.0.1:0`
///
/// `config.bind_addr` is ignored. The listener is bound before this
/// returns, so clients can connect right away.
pub async fn spawn_test_server(config: ServerConfig) -> Result<TestServer> {
    start(EchoServer::new(config)).await
}

/// Like [`spawn_test_server`], with a custom per-request observer
pub async fn spawn_test_server_with_observer(
    config: ServerConfig,
    observer: Arc<dyn RequestObserver>,
) -> Result<TestServer> {
    start(EchoServer::new(config).with_observer(observer)).await
}

async fn start(server: EchoServer) -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let shutdown = server.shutdown_signal();
    let handle = tokio::spawn(async move { server.serve(listener).await });

    Ok(TestServer {
        addr,
        shutdown,
        handle,
    })
}
