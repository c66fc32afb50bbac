use crate::dedup::DedupTracker;
use crate::error::Error;
use crate::model::{CaseDirectory, CaseIdentity, Eligibility};
use crate::queue::WorkQueue;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a case offered to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Queued,
    NotEligible(Eligibility),
    AlreadyClaimed,
    /// Claimed but the queue refused it (full under fail-fast). The claim is
    /// kept; the next process run picks the case up again.
    Rejected,
    /// Queue full on a non-blocking offer. The claim was released so the case
    /// can be offered again.
    Deferred,
}

/// The one path from "a case was seen" to "a case is queued", shared by the
/// startup sweep and the watcher: eligibility check, claim, enqueue.
#[derive(Clone)]
pub struct Intake {
    dedup: Arc<DedupTracker>,
    queue: Arc<WorkQueue>,
}

impl Intake {
    pub fn new(dedup: Arc<DedupTracker>, queue: Arc<WorkQueue>) -> Self {
        Self { dedup, queue }
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Fails only when the queue is closed. Waits for room when the queue is
    /// full under the blocking policy.
    pub fn offer(&self, case: CaseDirectory) -> Result<OfferOutcome, Error> {
        let identity = match self.claim(&case) {
            Ok(identity) => identity,
            Err(outcome) => return Ok(outcome),
        };
        match self.queue.enqueue(case) {
            Ok(()) => {
                debug!("{} queued", identity);
                Ok(OfferOutcome::Queued)
            }
            Err(Error::QueueFull) => {
                warn!("Queue full, {} deferred to the next run", identity);
                Ok(OfferOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`Intake::offer`] but never waits for room in the queue.
    pub fn try_offer(&self, case: CaseDirectory) -> Result<OfferOutcome, Error> {
        let identity = match self.claim(&case) {
            Ok(identity) => identity,
            Err(outcome) => return Ok(outcome),
        };
        match self.queue.try_enqueue(case) {
            Ok(()) => {
                debug!("{} queued", identity);
                Ok(OfferOutcome::Queued)
            }
            Err(e) => {
                self.dedup.release(&identity);
                match e {
                    Error::QueueFull => {
                        debug!("Queue full, {} will be offered again", identity);
                        Ok(OfferOutcome::Deferred)
                    }
                    e => Err(e),
                }
            }
        }
    }

    fn claim(&self, case: &CaseDirectory) -> Result<CaseIdentity, OfferOutcome> {
        match case.eligibility() {
            Eligibility::Eligible => {}
            other => {
                debug!("{} not eligible: {:?}", case.identity, other);
                return Err(OfferOutcome::NotEligible(other));
            }
        }
        if !self.dedup.try_claim(&case.identity) {
            debug!("{} already claimed", case.identity);
            return Err(OfferOutcome::AlreadyClaimed);
        }
        Ok(case.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnqueuePolicy;
    use std::path::PathBuf;

    fn case(id: &str, decision: bool, marker: bool) -> CaseDirectory {
        CaseDirectory {
            identity: CaseIdentity::new("camera1", "2025-01-01", id),
            path: PathBuf::from(format!("/r/camera1/2025-01-01/{}", id)),
            image_paths: vec![PathBuf::from("a.jpg")],
            has_decision_record: decision,
            has_output_marker: marker,
            output_dir: PathBuf::from("ai"),
        }
    }

    fn intake(capacity: usize, policy: EnqueuePolicy) -> Intake {
        Intake::new(
            Arc::new(DedupTracker::new()),
            Arc::new(WorkQueue::new(capacity, policy)),
        )
    }

    #[test]
    fn test_offer_claims_once() {
        let intake = intake(4, EnqueuePolicy::Block);
        assert_eq!(intake.offer(case("case1", true, false)).unwrap(), OfferOutcome::Queued);
        assert_eq!(
            intake.offer(case("case1", true, false)).unwrap(),
            OfferOutcome::AlreadyClaimed
        );
        assert_eq!(intake.queue().len(), 1);
    }

    #[test]
    fn test_ineligible_cases_are_not_claimed() {
        let intake = intake(4, EnqueuePolicy::Block);
        assert_eq!(
            intake.offer(case("case1", false, false)).unwrap(),
            OfferOutcome::NotEligible(Eligibility::MissingDecisionRecord)
        );
        assert_eq!(
            intake.offer(case("case2", true, true)).unwrap(),
            OfferOutcome::NotEligible(Eligibility::AlreadyProcessed)
        );
        assert_eq!(intake.dedup().claimed_count(), 0);
    }

    #[test]
    fn test_fail_fast_rejects_when_full() {
        let intake = intake(1, EnqueuePolicy::FailFast);
        assert_eq!(intake.offer(case("case1", true, false)).unwrap(), OfferOutcome::Queued);
        assert_eq!(intake.offer(case("case2", true, false)).unwrap(), OfferOutcome::Rejected);
    }

    #[test]
    fn test_try_offer_defers_and_releases_claim_when_full() {
        let intake = intake(1, EnqueuePolicy::Block);
        assert_eq!(intake.try_offer(case("case1", true, false)).unwrap(), OfferOutcome::Queued);
        assert_eq!(intake.try_offer(case("case2", true, false)).unwrap(), OfferOutcome::Deferred);
        assert_eq!(intake.dedup().claimed_count(), 1);

        intake.queue().receiver().recv().unwrap();
        assert_eq!(intake.try_offer(case("case2", true, false)).unwrap(), OfferOutcome::Queued);
    }

    #[test]
    fn test_offer_after_close_is_an_error() {
        let intake = intake(1, EnqueuePolicy::Block);
        intake.queue().close();
        assert!(matches!(
            intake.offer(case("case1", true, false)),
            Err(Error::QueueClosed)
        ));
    }
}
