//! Request dispatch
//!
//! Every request goes through the observer hook first and is then routed
//! by its kind. There is no path-based routing.

use crate::Result;
use crate::config::ServerConfig;
use crate::http::{ConnResponse, Connection, EchoRequest, serve_echo};
use crate::websocket::{Upgrader, is_websocket_upgrade, serve_websocket};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;


/// Hook invoked once for each incoming request, before it is answered
///
/// Called concurrently from every connection task.
pub trait RequestObserver: Send + Sync {
    fn observe(&self, request: &EchoRequest);
}

impl<F> RequestObserver for F
where
    F: Fn(&EchoRequest) + Send + Sync,
{
    fn observe(&self, request: &EchoRequest) {
        self(request)
    }
}

/// Observer that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {
    fn observe(&self, _request: &EchoRequest) {}
}

/// Observer that logs one line per request
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn observe(&self, request: &EchoRequest) {
        info!(
            method = %request.method(),
            url = %request.uri(),
            host = request.host(),
            peer = ?request.peer_addr(),
            "Request"
        );
    }
}

/// What an observer recorded about one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    pub host: String,
    pub peer_addr: Option<SocketAddr>,
}

impl From<&EchoRequest> for RequestSummary {
    fn from(request: &EchoRequest) -> Self {
        Self {
            method: request.method().to_string(),
            url: request.url(),
            host: request.host().to_string(),
            peer_addr: request.peer_addr(),
        }
    }
}

/// Observer that keeps a summary of every request in memory
#[derive(Debug, Default)]
pub struct BufferedObserver {
    requests: Mutex<Vec<RequestSummary>>,
}

impl BufferedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summaries recorded so far, oldest first
    pub fn requests(&self) -> Vec<RequestSummary> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RequestSummary>> {
        // A panicking observer must not disable the others.
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RequestObserver for BufferedObserver {
    fn observe(&self, request: &EchoRequest) {
        self.lock().push(RequestSummary::from(request));
    }
}

/// How a request is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A single JSON echo response
    Plain,
    /// A WebSocket upgrade followed by a frame echo loop
    WebSocketUpgrade,
}

impl RequestKind {
    pub fn classify(request: &EchoRequest) -> Self {
        if is_websocket_upgrade(request) {
            Self::WebSocketUpgrade
        } else {
            Self::Plain
        }
    }
}

/// Routes requests to the HTTP or WebSocket echo handler
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    upgrader: Arc<Upgrader>,
    observer: Arc<dyn RequestObserver>,
}

impl Dispatcher {
    pub fn new(config: Arc<ServerConfig>, observer: Arc<dyn RequestObserver>) -> Self {
        let upgrader = Arc::new(Upgrader::new(&config.websocket));
        Self {
            config,
            upgrader,
            observer,
        }
    }

    /// Answers one request
    ///
    /// Returns the connection when it can carry another request. A
    /// WebSocket upgrade always consumes it.
    pub async fn dispatch<S>(
        &self,
        request: EchoRequest,
        mut connection: Connection<S>,
    ) -> Result<Option<Connection<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.observer.observe(&request);

        match RequestKind::classify(&request) {
            RequestKind::WebSocketUpgrade => {
                serve_websocket(&self.upgrader, &request, connection, &self.config).await?;
                Ok(None)
            }
            RequestKind::Plain => {
                let mut response = ConnResponse::new(connection.stream_mut(), &request, &self.config);
                serve_echo(&request, &mut response).await?;
                let keep_alive = response.finish().await?;
                Ok(keep_alive.then_some(connection))
            }
        }
    }
}
