use crate::model::CaseIdentity;
use ahash::RandomState;
use dashmap::DashSet;

/// Process-wide record of claimed and completed cases.
///
/// Once its case is queued a claim is permanent for the life of the process,
/// even when processing fails. Durable completion across restarts is the output marker's job; the
/// `completed` set here only mirrors it for the current run.
#[derive(Debug)]
pub struct DedupTracker {
    claimed: DashSet<CaseIdentity, RandomState>,
    completed: DashSet<CaseIdentity, RandomState>,
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupTracker {
    pub fn new() -> Self {
        Self {
            claimed: DashSet::with_hasher(RandomState::new()),
            completed: DashSet::with_hasher(RandomState::new()),
        }
    }

    /// `true` for exactly one caller per identity.
    pub fn try_claim(&self, identity: &CaseIdentity) -> bool {
        self.claimed.insert(identity.clone())
    }

    pub fn mark_complete(&self, identity: &CaseIdentity) {
        self.completed.insert(identity.clone());
    }

    /// Give up a claim that never reached the queue.
    pub fn release(&self, identity: &CaseIdentity) {
        self.claimed.remove(identity);
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}
