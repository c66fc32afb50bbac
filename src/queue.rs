use crate::config::EnqueuePolicy;
use crate::error::Error;
use crate::model::CaseDirectory;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::RwLock;

/// Bounded FIFO of case jobs.
///
/// The queue owns the only sender. Closing drops it, so workers drain what is
/// left and then see the channel disconnect.
pub struct WorkQueue {
    intake: RwLock<Option<Sender<CaseDirectory>>>,
    outlet: Receiver<CaseDirectory>,
    policy: EnqueuePolicy,
}

impl WorkQueue {
    pub fn new(capacity: usize, policy: EnqueuePolicy) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            intake: RwLock::new(Some(tx)),
            outlet: rx,
            policy,
        }
    }

    /// Enqueue under the configured policy.
    pub fn enqueue(&self, job: CaseDirectory) -> Result<(), Error> {
        match self.policy {
            EnqueuePolicy::Block => self.sender()?.send(job).map_err(|_| Error::QueueClosed),
            EnqueuePolicy::FailFast => self.try_enqueue(job),
        }
    }

    /// Enqueue without waiting, whatever the policy. Fails with
    /// [`Error::QueueFull`] when there is no room.
    pub fn try_enqueue(&self, job: CaseDirectory) -> Result<(), Error> {
        self.sender()?.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Disconnected(_) => Error::QueueClosed,
        })
    }

    // Cloned so a blocking send never holds the lock that `close` needs.
    fn sender(&self) -> Result<Sender<CaseDirectory>, Error> {
        let guard = self.intake.read().map_err(|_| Error::QueueClosed)?;
        guard.as_ref().cloned().ok_or(Error::QueueClosed)
    }

    /// Handle for workers.
    pub fn receiver(&self) -> Receiver<CaseDirectory> {
        self.outlet.clone()
    }

    /// Stop intake. Jobs already queued stay available to workers.
    pub fn close(&self) {
        if let Ok(mut guard) = self.intake.write() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.intake.read().map(|g| g.is_none()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.outlet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outlet.is_empty()
    }
}
