//! Connect cycle and reconnection logic.
//!
//! Contains the shared [`SessionContext`], the bounded connect loop, and the
//! handler that restarts the lifecycle when an established connection drops.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mobilelink_protocol::codec;
use mobilelink_protocol::envelope::Envelope;

use crate::types::{ConnectError, SendError, SessionConfig, SessionEvent, SessionState};

/// Host and port of the hub the session targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) host: String,
    pub(crate) port: u16,
}

/// Shared state handed to the session, its pumps and the reconnect task.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) config: SessionConfig,
    pub(crate) state: Arc<RwLock<SessionState>>,
    /// Write half of the live socket; holding the lock is the send lock.
    pub(crate) writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    pub(crate) events_tx: mpsc::Sender<SessionEvent>,
    /// Cancelled once by `close()`; every connection token is a child of it.
    pub(crate) closed: CancellationToken,
    pub(crate) conn_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    /// Bumped per established connection so stale loops cannot restart the lifecycle.
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) target: Arc<std::sync::Mutex<Option<Target>>>,
}

impl SessionContext {
    pub(crate) fn new(config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let ctx = Self {
            config,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            events_tx,
            closed: CancellationToken::new(),
            conn_cancel: Arc::new(std::sync::Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            target: Arc::new(std::sync::Mutex::new(None)),
        };
        (ctx, events_rx)
    }

    /// Queues a lifecycle notification without waiting for the consumer.
    ///
    /// Dropped (and logged) when the channel is full or the session closed.
    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.closed.is_cancelled() {
            return;
        }
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(?event, "event channel full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => debug!("event receiver dropped"),
        }
    }

    /// Delivers an incoming message, waiting for channel capacity.
    ///
    /// Returns early if the session is closed while waiting.
    pub(crate) async fn deliver(&self, event: SessionEvent) {
        if self.closed.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = self.closed.cancelled() => {}
            result = self.events_tx.send(event) => {
                if result.is_err() {
                    debug!("event receiver dropped");
                }
            }
        }
    }

    pub(crate) async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    /// Encodes and writes one frame under the send lock.
    ///
    /// A write failure hands the connection to [`connection_lost`].
    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<usize, SendError> {
        let frame = codec::encode(envelope)?;
        if *self.state.read().await != SessionState::Connected {
            return Err(SendError::NotConnected);
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(SendError::NotConnected);
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        drop(guard);

        match result {
            Ok(()) => {
                self.emit(SessionEvent::SendComplete { bytes: frame.len() });
                Ok(frame.len())
            }
            Err(e) => {
                connection_lost(self, generation, &format!("write failed: {e}")).await;
                Err(SendError::WriteFailed(e))
            }
        }
    }

    fn current_target(&self) -> Option<Target> {
        self.target.lock().ok().and_then(|guard| guard.clone())
    }

    fn replace_conn_cancel(&self, token: Option<CancellationToken>) {
        if let Ok(mut guard) = self.conn_cancel.lock()
            && let Some(old) = std::mem::replace(&mut *guard, token)
        {
            old.cancel();
        }
    }
}

/// Runs up to `max_attempts` connect attempts against `target`.
///
/// Suspends until the session is `Connected` or the cycle ends in `Failed`.
/// The caller must already have moved the state to `Connecting`.
pub(crate) async fn connect_with_retry(
    ctx: &SessionContext,
    target: &Target,
) -> Result<(), ConnectError> {
    let max_attempts = ctx.config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if ctx.closed.is_cancelled() {
            return Err(ConnectError::Closed);
        }

        debug!(host = %target.host, port = target.port, attempt, "connecting");
        let addr = (target.host.as_str(), target.port);
        let error = match tokio::time::timeout(ctx.config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => return establish(ctx, stream).await,
            Ok(Err(e)) => ConnectError::Refused(e),
            Err(_) => ConnectError::Timeout,
        };

        warn!(
            host = %target.host,
            port = target.port,
            attempt,
            max_attempts,
            error = %error,
            "connect attempt failed"
        );
        ctx.emit(SessionEvent::ConnectAttemptFailed {
            attempt,
            error: error.to_string(),
        });

        if attempt < max_attempts {
            tokio::select! {
                _ = ctx.closed.cancelled() => return Err(ConnectError::Closed),
                _ = tokio::time::sleep(ctx.config.reconnect_delay) => {}
            }
        }
    }

    {
        let mut state = ctx.state.write().await;
        if ctx.closed.is_cancelled() {
            return Err(ConnectError::Closed);
        }
        *state = SessionState::Failed;
    }
    ctx.emit(SessionEvent::StateChanged(SessionState::Failed));
    warn!(host = %target.host, port = target.port, "all connect attempts failed");
    Err(ConnectError::AttemptsExhausted {
        attempts: max_attempts,
    })
}

/// Installs a freshly connected socket and starts its loops.
async fn establish(ctx: &SessionContext, stream: TcpStream) -> Result<(), ConnectError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {e}");
    }
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();

    let conn_cancel = ctx.closed.child_token();
    let generation = {
        let mut state = ctx.state.write().await;
        if ctx.closed.is_cancelled() {
            return Err(ConnectError::Closed);
        }
        let generation = ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *ctx.writer.lock().await = Some(write_half);
        ctx.replace_conn_cancel(Some(conn_cancel.clone()));
        *state = SessionState::Connected;
        generation
    };

    info!(peer = ?peer, generation, "connected to hub");
    ctx.emit(SessionEvent::StateChanged(SessionState::Connected));
    ctx.emit(SessionEvent::Connected);

    tokio::spawn(crate::pumps::read::read_pump(
        read_half,
        ctx.clone(),
        generation,
        conn_cancel.clone(),
    ));
    tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
        ctx.clone(),
        generation,
        conn_cancel,
    ));
    Ok(())
}

/// Tears down connection `generation` and restarts the connect lifecycle.
///
/// No-op if the session was closed, or if that connection is no longer
/// the current one.
pub(crate) async fn connection_lost(ctx: &SessionContext, generation: u64, reason: &str) {
    {
        let mut state = ctx.state.write().await;
        if ctx.closed.is_cancelled()
            || ctx.generation.load(Ordering::SeqCst) != generation
            || *state != SessionState::Connected
        {
            return;
        }
        *state = SessionState::Reconnecting;
        ctx.writer.lock().await.take();
        ctx.replace_conn_cancel(None);
    }

    warn!(generation, reason, "connection lost");
    ctx.emit(SessionEvent::Disconnected);
    ctx.emit(SessionEvent::StateChanged(SessionState::Reconnecting));
    ctx.emit(SessionEvent::Reconnecting);

    tokio::spawn(reconnect_task(ctx.clone()));
}

/// Starts a fresh connect cycle against the stored target.
///
/// Returns a boxed future to break the recursive type cycle with
/// [`connection_lost`] (which spawns this function).
pub(crate) fn reconnect_task(ctx: SessionContext) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(target) = ctx.current_target() else {
            warn!("no stored target, cannot reconnect");
            ctx.set_state(SessionState::Disconnected).await;
            return;
        };

        {
            let mut state = ctx.state.write().await;
            if ctx.closed.is_cancelled() || *state != SessionState::Reconnecting {
                return;
            }
            *state = SessionState::Connecting;
        }
        ctx.emit(SessionEvent::StateChanged(SessionState::Connecting));
        info!(host = %target.host, port = target.port, "reconnecting");

        match connect_with_retry(&ctx, &target).await {
            Ok(()) => info!(host = %target.host, "reconnected successfully"),
            Err(ConnectError::Closed) => debug!("reconnect cancelled"),
            Err(e) => warn!("reconnect failed: {e}"),
        }
    })
}
