//! TCP listener and accept loop

mod connection;

pub use connection::serve_connection;

use crate::Result;
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, NoopObserver, RequestObserver, TracingObserver};
use crate::security::ConnectionTracker;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{Instrument, error, info, warn};

/// HTTP and WebSocket echo server
///
/// # Examples
///
/// ```no_run
/// use echo_service::config::ServerConfig;
/// use echo_service::server::EchoServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig {
///         bind_addr: "127.0.0.1:8080".parse()?,
///         log_requests: true,
///         ..Default::default()
///     };
///
///     EchoServer::new(config).run().await?;
///     Ok(())
/// }
/// ```
pub struct EchoServer {
    config: Arc<ServerConfig>,
    observer: Arc<dyn RequestObserver>,
    shutdown_signal: Arc<broadcast::Sender<()>>,
}

impl EchoServer {
    /// Creates a server; requests are logged if `config.log_requests` is set
    pub fn new(config: ServerConfig) -> Self {
        let observer: Arc<dyn RequestObserver> = if config.log_requests {
            Arc::new(TracingObserver)
        } else {
            Arc::new(NoopObserver)
        };
        let (shutdown_signal, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            observer,
            shutdown_signal: Arc::new(shutdown_signal),
        }
    }

    /// Replaces the per-request observer
    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and serves until shut down
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Echo server listening");

        let dispatcher = Dispatcher::new(self.config.clone(), self.observer.clone());
        let tracker = ConnectionTracker::new(self.config.limits.max_concurrent_connections);
        let mut shutdown_rx = self.shutdown_signal.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let guard = match tracker.try_acquire() {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!(%addr, error = %e, "Connection rejected");
                            continue;
                        }
                    };
                    let current = guard.active_connections();
                    info!(%addr, current, "Accepted connection");

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let dispatcher = dispatcher.clone();
                    let limits = self.config.limits.clone();
                    let span = tracing::info_span!("connection", %addr);
                    tokio::spawn(
                        async move {
                            if let Err(e) = serve_connection(stream, Some(addr), &dispatcher, limits).await {
                                error!(error = %e, "Error handling connection");
                            }
                            drop(guard);
                            info!("Connection closed");
                        }
                        .instrument(span),
                    );
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received internal shutdown signal, stopping server");
                    break;
                }
            }
        }

        let metrics = tracker.metrics();
        info!(
            total_connections = metrics.total_connections,
            active_connections = metrics.active_connections,
            "Echo server stopped"
        );
        Ok(())
    }

    /// Returns a sender that stops the accept loop when a value is sent
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}
