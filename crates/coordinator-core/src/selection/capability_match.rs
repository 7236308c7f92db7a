use super::{Criteria, SelectionStrategy};
use crate::registry::DaemonRecord;

/// Filters by connected state, declared-max, encoder presence and GPU
/// availability; picks the survivor with fewest active jobs, tie-broken by
/// identifier for determinism.
pub struct CapabilityMatch;

impl SelectionStrategy for CapabilityMatch {
    fn select(&self, candidates: &[DaemonRecord], criteria: &Criteria) -> Option<DaemonRecord> {
        candidates
            .iter()
            .filter(|r| r.is_eligible(criteria.required_encoder.as_deref(), criteria.require_gpu))
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }
}
