//! Worker protocol RPC server: one persistent WebSocket per daemon
//! multiplexing Register/Heartbeat/Unregister and tagged Transcode streams.
//!
//! The connection loop multiplexes cancellation, incoming frames and a
//! heartbeat timer with `tokio::select!`, cleaning up the connection entry
//! whenever the loop exits for any reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::registry::DaemonRegistry;
use crate::rpc::auth::TokenAuthenticator;
use crate::rpc::messages::{
    ClientMessage, ServerMessage, TranscodeStartDescriptor, TranscodeStreamState,
};

/// Idle-connection timeout independent of the registry's heartbeat timeout:
/// if nothing arrives on the socket for this long the connection is closed
/// so a half-open TCP connection doesn't linger forever.
const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECTION_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Events surfaced from a daemon's Transcode stream to whoever started it.
#[derive(Debug, Clone)]
pub enum TranscodeEvent {
    Ack {
        success: bool,
        error: Option<String>,
        video_encoder: Option<String>,
        audio_encoder: Option<String>,
    },
    Progress {
        frames: u64,
        bitrate_kbps: f64,
        duration_seconds: f64,
    },
    Stop {
        reason: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("daemon {0} has no open connection")]
    NotConnected(String),
}

/// Per-connection handle, kept alive for as long as the daemon's socket is
/// open. Owns the outbound channel the coordinator uses to push
/// `TranscodeStart`/`TranscodeStop`, and tracks per-job stream state so
/// progress arriving before an ack is ignored per the protocol state machine.
struct Connection {
    outbound: mpsc::UnboundedSender<ServerMessage>,
    cancellation: CancellationToken,
    job_states: Mutex<HashMap<String, TranscodeStreamState>>,
    events: broadcast::Sender<(String, TranscodeEvent)>,
}

/// Tracks live connections by daemon id, separate from the daemon registry
/// itself: the registry is the source of truth for daemon *existence*, this
/// is the source of truth for which daemon has an open socket right now.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, daemon_id: &str, connection: Arc<Connection>) {
        if let Some(old) = self.connections.insert(daemon_id.to_string(), connection) {
            old.cancellation.cancel();
        }
    }

    fn remove(&self, daemon_id: &str) {
        self.connections.remove(daemon_id);
    }

    /// Sends a Transcode start descriptor to a connected daemon and returns a
    /// receiver for the resulting ack/progress/stop/error events.
    pub fn start_transcode(
        &self,
        daemon_id: &str,
        descriptor: TranscodeStartDescriptor,
    ) -> Result<broadcast::Receiver<(String, TranscodeEvent)>, RpcError> {
        let connection = self
            .connections
            .get(daemon_id)
            .ok_or_else(|| RpcError::NotConnected(daemon_id.to_string()))?;
        let job_id = descriptor.job_id.clone();
        connection
            .job_states
            .lock()
            .insert(job_id, TranscodeStreamState::AwaitingAck);
        let rx = connection.events.subscribe();
        let _ = connection
            .outbound
            .send(ServerMessage::TranscodeStart { descriptor });
        Ok(rx)
    }

    /// Requests a daemon stop an in-flight job. Either side may initiate stop.
    pub fn stop_transcode(&self, daemon_id: &str, job_id: &str, reason: &str) -> Result<(), RpcError> {
        let connection = self
            .connections
            .get(daemon_id)
            .ok_or_else(|| RpcError::NotConnected(daemon_id.to_string()))?;
        let _ = connection.outbound.send(ServerMessage::TranscodeStop {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Force-closes every open connection, used during the shutdown sequence.
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.cancellation.cancel();
        }
    }

    #[must_use]
    pub fn is_connected(&self, daemon_id: &str) -> bool {
        self.connections.contains_key(daemon_id)
    }
}

/// Shared state for the worker protocol's axum router.
#[derive(Clone)]
pub struct RpcServerState {
    pub registry: Arc<DaemonRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub authenticator: TokenAuthenticator,
    pub coordinator_version: String,
    pub heartbeat_interval: Duration,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RpcServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: RpcServerState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let cancellation = CancellationToken::new();
    let mut daemon_id: Option<String> = None;
    let mut last_activity = Instant::now();
    let mut idle_check = tokio::time::interval(CONNECTION_IDLE_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::debug!("connection cancelled");
                break;
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() > CONNECTION_IDLE_TIMEOUT {
                    tracing::warn!(?daemon_id, "connection idle timeout, closing");
                    break;
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Some(text) = message.to_json() {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                last_activity = Instant::now();
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                        match parsed {
                            Ok(message) => {
                                handle_message(
                                    &state,
                                    message,
                                    &mut daemon_id,
                                    &outbound_tx,
                                    &cancellation,
                                ).await;
                            }
                            Err(err) => {
                                tracing::warn!(%err, "failed to parse client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(%err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    if let Some(id) = daemon_id {
        state.connections.remove(&id);
        tracing::info!(daemon_id = %id, "daemon connection closed");
    }
}

async fn handle_message(
    state: &RpcServerState,
    message: ClientMessage,
    daemon_id: &mut Option<String>,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    cancellation: &CancellationToken,
) {
    match message {
        ClientMessage::Register {
            daemon_id: id,
            daemon_name,
            version,
            capabilities,
            auth_token,
        } => {
            if !state.authenticator.authenticate(auth_token.as_deref()) {
                tracing::warn!(daemon_id = %id, "registration rejected: authentication failed");
                let _ = outbound_tx.send(ServerMessage::AuthenticationFailed);
                cancellation.cancel();
                return;
            }

            state.registry.register(&id, daemon_name, version, capabilities);

            let connection = Arc::new(Connection {
                outbound: outbound_tx.clone(),
                cancellation: cancellation.clone(),
                job_states: Mutex::new(HashMap::new()),
                events: broadcast::channel(32).0,
            });
            state.connections.insert(&id, connection);
            *daemon_id = Some(id);

            let _ = outbound_tx.send(ServerMessage::RegisterAck {
                success: true,
                error: String::new(),
                coordinator_version: state.coordinator_version.clone(),
                heartbeat_interval_secs: state.heartbeat_interval.as_secs(),
            });
        }
        ClientMessage::Heartbeat {
            daemon_id: id,
            system_stats,
            active_jobs,
        } => match state.registry.handle_heartbeat(&id, system_stats, active_jobs) {
            Ok(_) => {
                let _ = outbound_tx.send(ServerMessage::HeartbeatAck {
                    success: true,
                    error: String::new(),
                });
            }
            Err(err) => {
                tracing::warn!(daemon_id = %id, %err, "heartbeat from unknown daemon");
                let _ = outbound_tx.send(ServerMessage::ProtocolError {
                    code: "UNKNOWN_DAEMON".to_string(),
                    message: err.to_string(),
                });
                cancellation.cancel();
            }
        },
        ClientMessage::Unregister {
            daemon_id: id,
            reason,
        } => {
            state.registry.unregister(&id, &reason);
            let _ = outbound_tx.send(ServerMessage::UnregisterAck { success: true });
            cancellation.cancel();
        }
        ClientMessage::TranscodeAck {
            job_id,
            success,
            error,
            video_encoder,
            audio_encoder,
        } => {
            if let Some(id) = daemon_id {
                if let Some(connection) = state.connections.get(id) {
                    let mut states = connection.job_states.lock();
                    let new_state = if success {
                        TranscodeStreamState::Running
                    } else {
                        TranscodeStreamState::Terminal
                    };
                    states.insert(job_id.clone(), new_state);
                    drop(states);
                    let _ = connection.events.send((
                        job_id,
                        TranscodeEvent::Ack {
                            success,
                            error,
                            video_encoder,
                            audio_encoder,
                        },
                    ));
                }
            }
        }
        ClientMessage::TranscodeProgress {
            job_id,
            frames,
            bitrate_kbps,
            duration_seconds,
        } => {
            if let Some(id) = daemon_id {
                if let Some(connection) = state.connections.get(id) {
                    let is_running = matches!(
                        connection.job_states.lock().get(&job_id),
                        Some(TranscodeStreamState::Running)
                    );
                    if is_running {
                        let _ = connection.events.send((
                            job_id,
                            TranscodeEvent::Progress {
                                frames,
                                bitrate_kbps,
                                duration_seconds,
                            },
                        ));
                    }
                    // Progress before ack is ignored per the protocol state machine.
                }
            }
        }
        ClientMessage::TranscodeStop { job_id, reason } => {
            if let Some(id) = daemon_id {
                if let Some(connection) = state.connections.get(id) {
                    connection
                        .job_states
                        .lock()
                        .insert(job_id.clone(), TranscodeStreamState::Terminal);
                    let _ = connection.events.send((job_id, TranscodeEvent::Stop { reason }));
                }
            }
        }
        ClientMessage::TranscodeError {
            job_id,
            kind,
            message,
        } => {
            if let Some(id) = daemon_id {
                if let Some(connection) = state.connections.get(id) {
                    connection
                        .job_states
                        .lock()
                        .insert(job_id.clone(), TranscodeStreamState::Terminal);
                    let _ = connection
                        .events
                        .send((job_id, TranscodeEvent::Error { kind, message }));
                }
            }
        }
    }
}

impl ConnectionRegistry {
    fn get(&self, daemon_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(daemon_id).map(|r| Arc::clone(&r))
    }
}
