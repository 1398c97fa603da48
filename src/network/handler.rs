//! Main network handler

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::proxy::HttpProxy;
use crate::Result;

use super::limiter::ConnectionLimiter;
use super::SHUTDOWN_TIMEOUT_MS;

/// Stops a running [`NetworkHandler`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Request graceful shutdown
    pub fn stop(&self) {
        self.tx.send(()).ok();
    }
}

/// Accepts client connections and serves them through the proxy
pub struct NetworkHandler {
    listener: TcpListener,
    proxy: Arc<HttpProxy>,
    limiter: ConnectionLimiter,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl NetworkHandler {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(
        addr: SocketAddr,
        proxy: Arc<HttpProxy>,
        max_connections: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            listener,
            proxy,
            limiter: ConnectionLimiter::new(max_connections),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the server from another task
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve until SIGINT or a shutdown request
    ///
    /// Shutdown stops accepting, lets open connections finish their
    /// current exchange and waits for every queued recording to be
    /// written. The listener is released last.
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails irrecoverably
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            proxy,
            limiter,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!("Listening on {}", addr);
        }

        let mut tasks = JoinSet::new();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(permit) = limiter.try_admit() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            let proxy = Arc::clone(&proxy);
                            let shutdown_rx = shutdown_tx.subscribe();

                            tasks.spawn(async move {
                                let _permit = permit;
                                serve_connection(stream, peer_addr, proxy, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        shutdown_tx.send(()).ok();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let joined = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                "{} connection(s) still open after {}ms, aborting",
                tasks.len(),
                SHUTDOWN_TIMEOUT_MS
            );
            tasks.shutdown().await;
        }

        proxy.stop().await;
        drop(listener);

        info!("Shutdown complete");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    proxy: Arc<HttpProxy>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("Accepted connection from {}", peer_addr);

    let service = service_fn(move |request: Request<Incoming>| {
        let proxy = Arc::clone(&proxy);
        async move { Ok::<_, Infallible>(proxy.handle(request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown_rx.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        debug!("Connection from {} ended with error: {}", peer_addr, e);
    }
}
