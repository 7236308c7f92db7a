use super::{Criteria, SelectionStrategy};
use crate::registry::DaemonRecord;

/// As capability-match, but among survivors prefers a non-exhausted hwaccel
/// path matching `criteria.prefer_hwaccel`, then datacenter-/professional-
/// class GPUs over consumer/integrated, then fewest active jobs.
pub struct GpuAware;

impl SelectionStrategy for GpuAware {
    fn select(&self, candidates: &[DaemonRecord], criteria: &Criteria) -> Option<DaemonRecord> {
        let mut survivors: Vec<&DaemonRecord> = candidates
            .iter()
            .filter(|r| r.is_eligible(criteria.required_encoder.as_deref(), criteria.require_gpu))
            .collect();

        if survivors.is_empty() {
            return None;
        }

        if let Some(ref hwaccel_type) = criteria.prefer_hwaccel {
            let with_hwaccel: Vec<&DaemonRecord> = survivors
                .iter()
                .copied()
                .filter(|r| r.capabilities.available_hwaccel(hwaccel_type).is_some())
                .collect();
            if !with_hwaccel.is_empty() {
                survivors = with_hwaccel;
            }
        }

        let premium: Vec<&DaemonRecord> = survivors
            .iter()
            .copied()
            .filter(|r| r.capabilities.has_premium_gpu())
            .collect();
        if !premium.is_empty() {
            survivors = premium;
        }

        survivors
            .into_iter()
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }
}
