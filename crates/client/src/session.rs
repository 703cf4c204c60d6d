//! Client connection session for a single hub.
//!
//! A session owns at most one TCP connection at a time. It drives the
//! connect cycle, runs read and heartbeat loops per connection, and
//! restarts the lifecycle when an established connection drops.

use tokio::sync::{Mutex, mpsc};
use tracing::info;

use mobilelink_protocol::envelope::Envelope;

use crate::reconnection::{SessionContext, Target, connect_with_retry};
use crate::types::{ConnectError, SendError, SessionConfig, SessionEvent, SessionState};

/// Connection to a MobileLink hub.
///
/// Notifications flow through an event channel taken once with
/// [`take_events`](Self::take_events). After [`close`](Self::close) no
/// further events are delivered and the session cannot be reused.
pub struct ConnectionSession {
    ctx: SessionContext,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
}

impl ConnectionSession {
    pub fn new(config: SessionConfig) -> Self {
        let (ctx, events_rx) = SessionContext::new(config);
        Self {
            ctx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    ///
    /// The receiver must be drained. Lifecycle notifications are dropped
    /// while the channel is full, and incoming messages wait for capacity,
    /// which stalls the read loop.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.ctx.state.read().await
    }

    /// Returns the host and port of the last `connect` call.
    pub fn target(&self) -> Option<(String, u16)> {
        self.ctx
            .target
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|t| (t.host.clone(), t.port)))
    }

    /// Connects to `host:port`, retrying up to the configured attempt count.
    ///
    /// Suspends until the session is connected or every attempt failed.
    /// Rejected with [`ConnectError::AlreadyConnected`] while a connection
    /// is up or being (re)established.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectError> {
        {
            let mut state = self.ctx.state.write().await;
            if self.ctx.closed.is_cancelled() {
                return Err(ConnectError::Closed);
            }
            if state.is_active() {
                return Err(ConnectError::AlreadyConnected);
            }
            *state = SessionState::Connecting;
        }
        self.ctx
            .emit(SessionEvent::StateChanged(SessionState::Connecting));

        let target = Target {
            host: host.to_string(),
            port,
        };
        if let Ok(mut guard) = self.ctx.target.lock() {
            *guard = Some(target.clone());
        }

        connect_with_retry(&self.ctx, &target).await
    }

    /// Sends one envelope. Returns the number of bytes written, prefix included.
    pub async fn send(&self, envelope: &Envelope) -> Result<usize, SendError> {
        self.ctx.send(envelope).await
    }

    pub async fn send_chat(&self, text: &str) -> Result<usize, SendError> {
        self.send(&Envelope::chat(text)).await
    }

    /// Asks the hub to stream every file it serves.
    pub async fn request_files(&self) -> Result<usize, SendError> {
        self.send(&Envelope::file_request()).await
    }

    pub async fn report_network_quality(&self, quality: f64) -> Result<usize, SendError> {
        self.send(&Envelope::network_quality(quality)).await
    }

    /// Closes the session for good: stops both loops, releases the socket,
    /// and suppresses further notifications.
    pub async fn close(&self) {
        self.ctx.closed.cancel();
        let mut state = self.ctx.state.write().await;
        self.ctx.writer.lock().await.take();
        *state = SessionState::Disconnected;
        info!("session closed");
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.ctx.closed.is_cancelled()
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.ctx.closed.cancel();
    }
}
