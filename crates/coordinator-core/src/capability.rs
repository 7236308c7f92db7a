//! Capability and telemetry data model.
//!
//! Pure data describing what a daemon can do ([`Capability`]) and how loaded
//! it currently is ([`TelemetrySnapshot`]). Nothing in this module mutates
//! shared state; the registry owns that.

use serde::{Deserialize, Serialize};

/// GPU tier, consumed by selection as a soft preference, never as a hard filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuClass {
    Consumer,
    Professional,
    Integrated,
    Datacenter,
}

/// A single GPU's declared capacity and, once a heartbeat has landed, its
/// live session counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub class: GpuClass,
    pub driver_version: String,
    /// 0 means unlimited.
    pub max_encode_sessions: u32,
    pub active_encode_sessions: u32,
    /// 0 means unlimited.
    pub max_decode_sessions: u32,
    pub active_decode_sessions: u32,
    pub memory_total_mb: u64,
}

impl GpuInfo {
    /// A GPU is session-exhausted iff it has a finite encode-session budget
    /// and every session is in use.
    #[must_use]
    pub fn is_session_exhausted(&self) -> bool {
        self.max_encode_sessions > 0 && self.active_encode_sessions >= self.max_encode_sessions
    }

    #[must_use]
    pub fn has_available_encode_session(&self) -> bool {
        !self.is_session_exhausted()
    }
}

/// A hardware-acceleration back-end (nvenc, vaapi, qsv, ...) with its own
/// encoder/decoder lists, independent of the daemon's software lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwAccel {
    pub hwaccel_type: String,
    pub device_path: String,
    pub available: bool,
    pub encoders: Vec<String>,
    pub decoders: Vec<String>,
}

/// Declared, immutable-after-registration capability set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capability {
    pub video_encoders: Vec<String>,
    pub video_decoders: Vec<String>,
    pub audio_encoders: Vec<String>,
    pub audio_decoders: Vec<String>,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    #[serde(default)]
    pub hwaccels: Vec<HwAccel>,
    #[serde(default)]
    pub gpus: Vec<GpuInfo>,
}

impl Capability {
    /// Case-sensitive linear scan across every encoder/decoder list.
    #[must_use]
    pub fn has_encoder(&self, name: &str) -> bool {
        self.video_encoders.iter().any(|e| e == name)
            || self.audio_encoders.iter().any(|e| e == name)
            || self
                .hwaccels
                .iter()
                .any(|h| h.available && h.encoders.iter().any(|e| e == name))
    }

    #[must_use]
    pub fn has_decoder(&self, name: &str) -> bool {
        self.video_decoders.iter().any(|d| d == name)
            || self.audio_decoders.iter().any(|d| d == name)
            || self
                .hwaccels
                .iter()
                .any(|h| h.available && h.decoders.iter().any(|d| d == name))
    }

    /// True iff this capability declares no GPUs at all, or at least one
    /// declared GPU still has an encode session to hand out.
    #[must_use]
    pub fn has_available_gpu_session(&self) -> bool {
        self.gpus.is_empty() || self.gpus.iter().any(GpuInfo::has_available_encode_session)
    }

    /// Finds a non-exhausted hwaccel path of the given type, if declared.
    #[must_use]
    pub fn available_hwaccel(&self, hwaccel_type: &str) -> Option<&HwAccel> {
        self.hwaccels
            .iter()
            .find(|h| h.available && h.hwaccel_type == hwaccel_type)
    }

    /// True iff this capability has at least one GPU that is not the
    /// lowest-preference class (consumer/integrated), used by the GPU-aware
    /// strategy's soft class preference.
    #[must_use]
    pub fn has_premium_gpu(&self) -> bool {
        self.gpus
            .iter()
            .any(|g| matches!(g.class, GpuClass::Professional | GpuClass::Datacenter))
    }
}

/// Host identity reported with each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostIdentity {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cpu_cores: u32,
}

/// System-level telemetry carried by a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    pub host: HostIdentity,
    pub cpu_percent: f32,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_available_mb: u64,
    pub memory_percent: f32,
    #[serde(default)]
    pub gpus: Vec<GpuInfo>,
}

/// Telemetry snapshot stored on a [`crate::registry::record::DaemonRecord`].
/// `None` until the first heartbeat lands.
pub type TelemetrySnapshot = SystemStats;

/// A single job a daemon reports as active in its heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: String,
    pub channel_name: String,
}
