//! Pluggable selection strategies and the GPU-first-with-fallback
//! composition policy used by the service facade.

mod capability_match;
mod gpu_aware;
mod least_loaded;

pub use capability_match::CapabilityMatch;
pub use gpu_aware::GpuAware;
pub use least_loaded::LeastLoaded;

use crate::registry::DaemonRecord;

/// Selection inputs shared by every strategy.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub required_encoder: Option<String>,
    pub require_gpu: bool,
    pub prefer_hwaccel: Option<String>,
}

/// Shared contract: filter + pick one candidate, or report "no suitable
/// daemon" via `None`. `None` is a normal outcome, never an error.
pub trait SelectionStrategy {
    fn select(&self, candidates: &[DaemonRecord], criteria: &Criteria) -> Option<DaemonRecord>;
}

/// What to do when the GPU-aware pass finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Retry capability-match against a software encoder with `require_gpu = false`.
    Fallback,
    /// Return `None` to the caller.
    Reject,
}

/// Composes the strategies: try GPU-aware first when a
/// hardware encoder is requested, then optionally fall back to
/// capability-match against a software encoder. This composition lives
/// outside the strategies themselves so policies can be swapped freely.
pub fn select_for_job(
    candidates: &[DaemonRecord],
    hw_criteria: &Criteria,
    software_fallback_encoder: Option<&str>,
    policy: FallbackPolicy,
) -> Option<DaemonRecord> {
    if let Some(found) = GpuAware.select(candidates, hw_criteria) {
        return Some(found);
    }
    match policy {
        FallbackPolicy::Reject => None,
        FallbackPolicy::Fallback => {
            let fallback_criteria = Criteria {
                required_encoder: software_fallback_encoder.map(str::to_string),
                require_gpu: false,
                prefer_hwaccel: None,
            };
            CapabilityMatch.select(candidates, &fallback_criteria)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, GpuClass, GpuInfo};
    use crate::registry::DaemonRecord;

    fn record(id: &str, encoders: &[&str], gpu: Option<(u32, u32)>) -> DaemonRecord {
        let gpus = gpu
            .map(|(max, active)| {
                vec![GpuInfo {
                    index: 0,
                    name: "gpu0".into(),
                    class: GpuClass::Consumer,
                    driver_version: "1".into(),
                    max_encode_sessions: max,
                    active_encode_sessions: active,
                    max_decode_sessions: 0,
                    active_decode_sessions: 0,
                    memory_total_mb: 8192,
                }]
            })
            .unwrap_or_default();
        DaemonRecord::new(
            id.into(),
            id.into(),
            "1.0".into(),
            Capability {
                video_encoders: encoders.iter().map(|s| s.to_string()).collect(),
                gpus,
                ..Default::default()
            },
        )
    }

    #[test]
    fn falls_back_to_software_encoder_when_no_gpu_candidate() {
        let candidates = vec![record("cpu-only", &["libx264"], None)];
        let hw = Criteria {
            required_encoder: Some("h264_nvenc".into()),
            require_gpu: true,
            prefer_hwaccel: None,
        };
        let result = select_for_job(&candidates, &hw, Some("libx264"), FallbackPolicy::Fallback);
        assert_eq!(result.unwrap().id, "cpu-only");
    }

    #[test]
    fn reject_policy_returns_none_without_trying_fallback() {
        let candidates = vec![record("cpu-only", &["libx264"], None)];
        let hw = Criteria {
            required_encoder: Some("h264_nvenc".into()),
            require_gpu: true,
            prefer_hwaccel: None,
        };
        let result = select_for_job(&candidates, &hw, Some("libx264"), FallbackPolicy::Reject);
        assert!(result.is_none());
    }

    #[test]
    fn gpu_candidate_satisfies_hw_criteria_directly() {
        let candidates = vec![record("nvenc", &["h264_nvenc"], Some((3, 0)))];
        let hw = Criteria {
            required_encoder: Some("h264_nvenc".into()),
            require_gpu: true,
            prefer_hwaccel: None,
        };
        let result = select_for_job(&candidates, &hw, Some("libx264"), FallbackPolicy::Fallback);
        assert_eq!(result.unwrap().id, "nvenc");
    }
}
