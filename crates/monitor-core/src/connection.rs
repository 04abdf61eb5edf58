//! Persistent stream connection lifecycle
//!
//! [`ConnectionManager`] owns exactly one logical connection to the
//! dashboard stream endpoint: connect, authenticate (bearer token as a
//! query parameter), detect loss, reconnect on a fixed delay, and tear
//! down. The state machine is
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...`, with
//! a terminal `Disconnected` reached only through [`shutdown`].
//!
//! Invariants:
//!
//! - At most one live connection attempt exists at a time. A `connect`
//!   call while one is in flight is ignored, never layered.
//! - At most one reconnect timer is pending at a time; the retry sleep
//!   lives inside the single run loop, so a second timer cannot exist.
//! - Shutdown stops the run loop before the socket is closed, so the
//!   close of a socket we are discarding never schedules a reconnect.
//!
//! [`shutdown`]: ConnectionManager::shutdown

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::events::ControlMessage;

/// Default delay between reconnect attempts. Seconds, not sub-second:
/// the token dependency rarely changes and the server tolerates a briefly
/// stale view.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

struct ConnectionInner {
    ws_url: String,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    inbound_tx: mpsc::UnboundedSender<String>,
    outbound_tx: mpsc::UnboundedSender<ControlMessage>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<ControlMessage>>>,
    on_connected: std::sync::RwLock<Option<Arc<dyn Fn(bool) + Send + Sync>>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owns the lifecycle of one persistent stream connection.
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    /// Create a manager for the given stream URL (token already encoded
    /// as a query parameter). Returns the manager and the receiver of
    /// inbound text frames.
    pub fn new(
        ws_url: String,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let manager = Self {
            inner: Arc::new(ConnectionInner {
                ws_url,
                reconnect_delay,
                state,
                shutdown,
                inbound_tx,
                outbound_tx,
                outbound_rx: tokio::sync::Mutex::new(Some(outbound_rx)),
                on_connected: std::sync::RwLock::new(None),
                task: std::sync::Mutex::new(None),
            }),
        };
        (manager, inbound_rx)
    }

    /// Callback invoked after every successful open, before any frame of
    /// the new session is read. The argument is `true` when the open is a
    /// reconnect (a previous session existed), which is when the monitor
    /// replays call subscriptions.
    pub fn set_on_connected(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self.inner.on_connected.write().unwrap() = Some(Arc::new(callback));
    }

    /// Sender for control messages. Messages sent while disconnected are
    /// dropped when the next connection opens; the replay callback is
    /// what restores subscription state.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<ControlMessage> {
        self.inner.outbound_tx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Start the connection. Idempotent: a call while the connection is
    /// connecting or connected is ignored, and a call after shutdown is
    /// refused.
    pub fn connect(&self) {
        if *self.inner.shutdown.borrow() {
            warn!("connect refused: connection manager is shut down");
            return;
        }
        let mut task = self.inner.task.lock().unwrap();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("duplicate connect attempt ignored");
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run(inner)));
    }

    /// Tear the connection down for good: stop the run loop (cancelling
    /// any pending reconnect timer), close the socket, and settle in the
    /// terminal `Disconnected` state.
    pub async fn shutdown(&self) {
        // send_replace rather than send: the flag must stick even when no
        // run loop is subscribed yet.
        self.inner.shutdown.send_replace(true);
        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("stream connection shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

/// The single run loop: connect, pump frames, reconnect on a fixed delay.
/// Exits only when shutdown is requested.
async fn run(inner: Arc<ConnectionInner>) {
    let mut shutdown_rx = inner.shutdown.subscribe();
    let mut had_session = false;
    let mut outbound = match inner.outbound_rx.lock().await.take() {
        Some(rx) => rx,
        None => {
            // A previous run loop already consumed the receiver; nothing
            // sane to do but bail.
            warn!("connection run loop started twice");
            return;
        }
    };

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        inner.state.send_replace(ConnectionState::Connecting);
        debug!(url = %redact_token(&inner.ws_url), "opening stream connection");

        let attempt = tokio::select! {
            _ = shutdown_rx.changed() => break,
            attempt = connect_async(&inner.ws_url) => attempt,
        };

        match attempt {
            Ok((ws, _response)) => {
                info!("stream connected");
                // Control messages queued while disconnected are stale;
                // the replay callback rebuilds subscription state.
                while outbound.try_recv().is_ok() {}
                let reconnect = had_session;
                had_session = true;
                inner.state.send_replace(ConnectionState::Connected);
                let callback = inner.on_connected.read().unwrap().clone();
                if let Some(callback) = callback {
                    callback(reconnect);
                }

                let (mut sink, mut stream) = ws.split();
                let mut outbound_open = true;
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            // Stop pumping before closing: the close of a
                            // socket we are discarding must not look like
                            // a connection loss.
                            let _ = sink.close().await;
                            return;
                        }
                        maybe_msg = outbound.recv(), if outbound_open => {
                            match maybe_msg {
                                Some(msg) => {
                                    let json = match serde_json::to_string(&msg) {
                                        Ok(json) => json,
                                        Err(e) => {
                                            warn!(error = %e, "failed to encode control message");
                                            continue;
                                        }
                                    };
                                    if sink.send(Message::Text(json.into())).await.is_err() {
                                        warn!("send failed, connection lost");
                                        break;
                                    }
                                }
                                None => outbound_open = false,
                            }
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = inner.inbound_tx.send(text.to_string());
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    debug!("server closed the stream");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "stream read error");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "stream connect failed");
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }
        inner.state.send_replace(ConnectionState::Disconnected);
        debug!(delay = ?inner.reconnect_delay, "scheduling reconnect");
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(inner.reconnect_delay) => {}
        }
    }

    inner.state.send_replace(ConnectionState::Disconnected);
}

/// Strip the token query parameter before a URL reaches the logs.
fn redact_token(url: &str) -> String {
    match url.split_once("token=") {
        Some((prefix, _)) => format!("{prefix}token=<redacted>"),
        None => url.to_string(),
    }
}
