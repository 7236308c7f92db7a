use super::{Criteria, SelectionStrategy};
use crate::registry::DaemonRecord;

/// Ignores the requested encoder entirely; picks the eligible candidate with
/// fewest active jobs.
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn select(&self, candidates: &[DaemonRecord], criteria: &Criteria) -> Option<DaemonRecord> {
        candidates
            .iter()
            .filter(|r| r.is_eligible(None, criteria.require_gpu))
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }
}
