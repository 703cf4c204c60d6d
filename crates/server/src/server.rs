//! Hub TCP listener.
//!
//! Accepts client connections on the configured port and runs one
//! [`ClientSession`] task per connection until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use mobilelink_protocol::constants::{BASE_CHUNK_DELAY, DEFAULT_PORT, STATS_REPORT_INTERVAL};

use crate::ServerError;
use crate::session::ClientSession;
use crate::stats::{StatsRegistry, spawn_monitor};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Directory whose regular files are streamed on `filerequest`.
    pub serving_dir: PathBuf,
    pub stats_interval: Duration,
    /// Pause after each chunk at network quality 1.0.
    pub base_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            serving_dir: PathBuf::from("./files"),
            stats_interval: STATS_REPORT_INTERVAL,
            base_delay: BASE_CHUNK_DELAY,
        }
    }
}

/// The hub listener.
///
/// Shutdown stops accepting first, then cancels every session and waits
/// for them to finish.
pub struct ServerListener {
    config: Arc<ServerConfig>,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl ServerListener {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            stats: Arc::new(StatsRegistry::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared counters for this listener.
    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Binds the configured port, starts the stats monitor, and accepts
    /// connections. Returns once every session has ended.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            serving_dir = %self.config.serving_dir.display(),
            "hub listening on {local_addr}"
        );

        let monitor = spawn_monitor(
            Arc::clone(&self.stats),
            self.config.stats_interval,
            self.cancel.child_token(),
        );

        let sessions_cancel = CancellationToken::new();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(%peer_addr, "set_nodelay failed: {e}");
                            }
                            let (reader, writer) = stream.into_split();
                            let session = ClientSession::new(
                                peer_addr.to_string(),
                                reader,
                                writer,
                                Arc::clone(&self.config),
                                Arc::clone(&self.stats),
                                sessions_cancel.child_token(),
                            );
                            sessions.spawn(async move {
                                // The session logs its own outcome.
                                let _ = session.run().await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("session task failed: {e}");
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(sessions = sessions.len(), "server shutting down");
        sessions_cancel.cancel();
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                tracing::error!("session task failed: {e}");
            }
        }
        if let Err(e) = monitor.await {
            tracing::error!("stats monitor failed: {e}");
        }

        *self.local_addr.lock().await = None;
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopped");
        Ok(())
    }
}
