use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("transport is not connected")]
    NotConnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before the session terminates.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: None, base_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_retries.is_some_and(|max| consecutive_failures > max)
    }
}

/// Raw Socket Mode connection: dial, read text frames, write acks.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next text frame, or `None` once the peer has closed the connection.
    async fn next_frame(&self) -> Result<Option<String>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    ConnectionError,
    Terminated,
}

/// An inbound `events_api` request still carrying its undecoded payload.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketRequest {
    pub envelope_id: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connecting { attempt: u32 },
    ConnectionError { attempt: u32, error: String },
    Connected { attempt: u32 },
    Hello,
    EventsApi(SocketRequest),
    Other { event_type: String },
}

impl TransportEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::ConnectionError { .. } => "connection_error",
            Self::Connected { .. } => "connected",
            Self::Hello => "hello",
            Self::EventsApi(_) => "events_api",
            Self::Other { event_type } => event_type,
        }
    }
}

/// Receiving end of the session's event stream. Ends when the session terminates.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn channel() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, envelope_id: &str) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct SessionAcknowledger {
    transport: Arc<dyn SocketTransport>,
}

#[async_trait]
impl Acknowledger for SessionAcknowledger {
    async fn ack(&self, envelope_id: &str) -> Result<(), TransportError> {
        self.transport.acknowledge(envelope_id).await
    }
}

pub struct SocketModeSession {
    transport: Arc<dyn SocketTransport>,
    reconnect_policy: ReconnectPolicy,
    log_frames: bool,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    state_tx: watch::Sender<SessionState>,
}

impl SocketModeSession {
    pub fn new(transport: Arc<dyn SocketTransport>, reconnect_policy: ReconnectPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            transport,
            reconnect_policy,
            log_frames: false,
            events_tx,
            events_rx: Some(events_rx),
            state_tx,
        }
    }

    pub fn with_frame_logging(mut self, log_frames: bool) -> Self {
        self.log_frames = log_frames;
        self
    }

    /// Takes the single consumer end of the event stream; `None` on later calls.
    pub fn events(&mut self) -> Option<SessionEvents> {
        self.events_rx.take().map(|rx| SessionEvents { rx })
    }

    pub fn acknowledger(&self) -> SessionAcknowledger {
        SessionAcknowledger { transport: Arc::clone(&self.transport) }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Runs the connection lifecycle until `shutdown` flips to `true` or the
    /// reconnect budget runs out. Dropping the session afterwards closes the
    /// event stream.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt = 0_u32;
        let mut consecutive_failures = 0_u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            attempt += 1;
            self.transition(SessionState::Connecting);
            self.emit(TransportEvent::Connecting { attempt });

            let exit = tokio::select! {
                result = self.connect_and_pump(attempt, &mut consecutive_failures) => result,
                () = shutdown_requested(&mut shutdown) => Ok(ConnectionExit::Shutdown),
            };

            let delay = match exit {
                Ok(ConnectionExit::Shutdown) => {
                    if let Err(error) = self.transport.disconnect().await {
                        debug!(error = %error, "disconnect during shutdown failed");
                    }
                    break;
                }
                Ok(ConnectionExit::Disconnected) => {
                    info!(
                        event_name = "system.socket.disconnected",
                        attempt,
                        "socket mode connection closed; reconnecting"
                    );
                    self.reconnect_policy.backoff(0)
                }
                Err(error) => {
                    consecutive_failures += 1;
                    self.transition(SessionState::ConnectionError);
                    self.emit(TransportEvent::ConnectionError {
                        attempt,
                        error: error.to_string(),
                    });
                    warn!(
                        event_name = "system.socket.connection_error",
                        attempt,
                        consecutive_failures,
                        max_retries = ?self.reconnect_policy.max_retries,
                        error = %error,
                        "socket mode transport failed"
                    );

                    if self.reconnect_policy.exhausted(consecutive_failures) {
                        warn!(
                            event_name = "system.socket.retries_exhausted",
                            max_retries = ?self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; terminating session"
                        );
                        break;
                    }
                    self.reconnect_policy.backoff(consecutive_failures - 1)
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = shutdown_requested(&mut shutdown) => break,
                }
            }
        }

        self.transition(SessionState::Terminated);
        info!(
            event_name = "system.socket.terminated",
            attempts = attempt,
            "socket mode session terminated"
        );
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        consecutive_failures: &mut u32,
    ) -> Result<ConnectionExit, TransportError> {
        info!(event_name = "system.socket.connecting", attempt, "opening socket mode connection");
        self.transport.connect().await?;
        *consecutive_failures = 0;
        self.transition(SessionState::Connected);
        self.emit(TransportEvent::Connected { attempt });

        loop {
            let Some(text) = self.transport.next_frame().await? else {
                info!(
                    event_name = "system.socket.stream_closed",
                    attempt,
                    "socket mode stream closed"
                );
                self.transport.disconnect().await?;
                return Ok(ConnectionExit::Disconnected);
            };

            if self.log_frames {
                debug!(event_name = "ingress.slack.frame", frame = %text, "raw socket mode frame");
            }

            match decode_frame(&text) {
                Ok(SocketFrame::Hello) => self.emit(TransportEvent::Hello),
                Ok(SocketFrame::EventsApi(request)) => {
                    debug!(
                        event_name = "ingress.slack.envelope_received",
                        envelope_id = %request.envelope_id,
                        "received events api envelope"
                    );
                    self.emit(TransportEvent::EventsApi(request));
                }
                Ok(SocketFrame::Disconnect { reason }) => {
                    info!(
                        event_name = "ingress.slack.disconnect_requested",
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "slack requested a reconnect"
                    );
                    self.emit(TransportEvent::Other { event_type: "disconnect".to_owned() });
                    self.transport.disconnect().await?;
                    return Ok(ConnectionExit::Disconnected);
                }
                Ok(SocketFrame::Other { frame_type }) => {
                    self.emit(TransportEvent::Other { event_type: frame_type });
                }
                Err(error) => {
                    warn!(
                        event_name = "ingress.slack.frame_invalid",
                        error = %error,
                        "dropping socket mode frame that is not valid json"
                    );
                }
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("event consumer is gone; dropping transport event");
        }
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "socket mode session state changed");
        }
    }
}

enum ConnectionExit {
    Shutdown,
    Disconnected,
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped without ever asking for shutdown.
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, PartialEq)]
enum SocketFrame {
    Hello,
    Disconnect { reason: Option<String> },
    EventsApi(SocketRequest),
    Other { frame_type: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

fn decode_frame(text: &str) -> Result<SocketFrame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;

    Ok(match raw.frame_type.as_str() {
        "hello" => SocketFrame::Hello,
        "disconnect" => SocketFrame::Disconnect { reason: raw.reason },
        "events_api" => match raw.envelope_id {
            Some(envelope_id) => SocketFrame::EventsApi(SocketRequest {
                envelope_id,
                payload: raw.payload.unwrap_or(Value::Null),
            }),
            None => SocketFrame::Other { frame_type: "events_api".to_owned() },
        },
        other => SocketFrame::Other { frame_type: other.to_owned() },
    })
}
