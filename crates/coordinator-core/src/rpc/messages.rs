//! Wire schema for the worker protocol: tagged JSON envelopes
//! carried over a single persistent WebSocket per daemon.

use serde::{Deserialize, Serialize};

use crate::capability::{ActiveJob, Capability, TelemetrySnapshot};

/// Messages a daemon sends to the coordinator over its connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Register {
        daemon_id: String,
        daemon_name: String,
        version: String,
        capabilities: Capability,
        #[serde(default)]
        auth_token: Option<String>,
    },
    Heartbeat {
        daemon_id: String,
        #[serde(default)]
        system_stats: Option<TelemetrySnapshot>,
        #[serde(default)]
        active_jobs: Vec<ActiveJob>,
    },
    Unregister {
        daemon_id: String,
        reason: String,
    },
    TranscodeAck {
        job_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        video_encoder: Option<String>,
        #[serde(default)]
        audio_encoder: Option<String>,
    },
    TranscodeProgress {
        job_id: String,
        frames: u64,
        bitrate_kbps: f64,
        duration_seconds: f64,
    },
    TranscodeStop {
        job_id: String,
        reason: String,
    },
    TranscodeError {
        job_id: String,
        kind: String,
        message: String,
    },
}

/// A job-placement descriptor the coordinator sends to start a Transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeStartDescriptor {
    pub job_id: String,
    pub channel_name: String,
    pub source_video_codec: Option<String>,
    pub source_audio_codec: Option<String>,
    pub target_video_codec: Option<String>,
    pub target_audio_codec: Option<String>,
    pub requested_video_encoder: Option<String>,
    pub requested_audio_encoder: Option<String>,
    pub preset: Option<String>,
    pub bitstream_filter: Option<String>,
}

/// Messages the coordinator sends to a daemon over its connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    RegisterAck {
        success: bool,
        error: String,
        coordinator_version: String,
        heartbeat_interval_secs: u64,
    },
    HeartbeatAck {
        success: bool,
        error: String,
    },
    UnregisterAck {
        success: bool,
    },
    TranscodeStart {
        #[serde(flatten)]
        descriptor: TranscodeStartDescriptor,
    },
    TranscodeStop {
        job_id: String,
        reason: String,
    },
    AuthenticationFailed,
    /// A distinct error-typed failure for protocol violations that aren't a
    /// simple ack rejection, e.g. a heartbeat from a daemon with no
    /// registration on file. Closes the connection: the daemon must
    /// re-register before anything else from it is accepted.
    ProtocolError {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Per-stream protocol state machine, tracked per `job_id` on a
/// connection so several concurrent transcodes can multiplex over one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStreamState {
    AwaitingAck,
    Running,
    Terminal,
}
