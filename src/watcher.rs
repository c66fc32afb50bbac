use crate::error::Error;
use crate::intake::{Intake, OfferOutcome};
use crate::scanner::CaseScanner;
use dashmap::DashSet;
use notify_debouncer_mini::notify::{self, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Recursive subscription on the ingest root that turns file events into
/// intake offers.
///
/// Events are debounced per path for the grace period, so a case is looked at
/// only once its files stop changing. The watcher never runs detection; it only
/// re-validates the case and hands it to [`Intake`] without waiting for room
/// in the queue. Cases that find the queue full are kept aside until
/// [`CaseWatcher::retry_deferred`]. Dropping the watcher stops the subscription.
pub struct CaseWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    scanner: CaseScanner,
    intake: Intake,
    deferred: Arc<DashSet<PathBuf>>,
}

impl CaseWatcher {
    pub fn start(scanner: CaseScanner, intake: Intake, grace: Duration) -> Result<Self, Error> {
        let root = scanner.root().to_path_buf();
        let deferred: Arc<DashSet<PathBuf>> = Arc::new(DashSet::new());
        let mut debouncer = {
            let scanner = scanner.clone();
            let intake = intake.clone();
            let deferred = Arc::clone(&deferred);
            new_debouncer(grace, move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    dispatch(&scanner, &intake, &paths, &deferred);
                }
                Err(e) => error!("Watcher error: {}", e),
            })?
        };

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        info!(
            "Watching {} (grace period {}ms)",
            root.display(),
            grace.as_millis()
        );

        Ok(Self {
            _debouncer: debouncer,
            scanner,
            intake,
            deferred,
        })
    }

    /// Offer again the cases that found the queue full. Returns the number queued.
    pub fn retry_deferred(&self) -> usize {
        retry_deferred(&self.scanner, &self.intake, &self.deferred)
    }
}

/// Resolve event paths to case directories and offer each distinct case once.
/// Never waits on the queue: a case that finds it full goes into `deferred`.
/// Returns the number of cases queued.
pub fn dispatch(
    scanner: &CaseScanner,
    intake: &Intake,
    paths: &[PathBuf],
    deferred: &DashSet<PathBuf>,
) -> usize {
    let output_dir = scanner.layout().output_dir.as_str();
    let cases: BTreeSet<PathBuf> = paths
        .iter()
        .filter_map(|path| {
            let case_dir = scanner.case_dir_for(path)?;
            // Our own writes under the output folder are not triggers.
            let inside_output = path
                .strip_prefix(&case_dir)
                .ok()
                .and_then(|rel| rel.components().next())
                .map_or(false, |first| first.as_os_str() == output_dir);
            (!inside_output).then_some(case_dir)
        })
        .collect();

    let mut queued = 0;
    for case_dir in cases {
        let case = match scanner.inspect(&case_dir) {
            Ok(Some(case)) => case,
            Ok(None) => continue,
            Err(e) => {
                debug!("Ignoring event for {}: {}", case_dir.display(), e);
                continue;
            }
        };
        match intake.try_offer(case) {
            Ok(OfferOutcome::Queued) => {
                info!("Queued {} from file event", case_dir.display());
                queued += 1;
            }
            Ok(OfferOutcome::Deferred) => {
                debug!("Queue full, holding {} for retry", case_dir.display());
                deferred.insert(case_dir);
            }
            Ok(_) => {}
            Err(Error::QueueClosed) => {
                debug!("Queue closed, dropping event for {}", case_dir.display());
            }
            Err(e) => warn!("Could not queue {}: {}", case_dir.display(), e),
        }
    }
    queued
}

/// Take everything out of `deferred` and dispatch it again.
pub fn retry_deferred(scanner: &CaseScanner, intake: &Intake, deferred: &DashSet<PathBuf>) -> usize {
    let pending: Vec<PathBuf> = deferred.iter().map(|p| p.key().clone()).collect();
    if pending.is_empty() {
        return 0;
    }
    for path in &pending {
        deferred.remove(path);
    }
    dispatch(scanner, intake, &pending, deferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaseLayout, EnqueuePolicy};
    use crate::dedup::DedupTracker;
    use crate::queue::WorkQueue;
    use std::fs;
    use std::thread;

    fn setup() -> (tempfile::TempDir, CaseScanner, Intake) {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = CaseScanner::new(tmp.path(), CaseLayout::default());
        let intake = Intake::new(
            Arc::new(DedupTracker::new()),
            Arc::new(WorkQueue::new(8, EnqueuePolicy::Block)),
        );
        (tmp, scanner, intake)
    }

    #[test]
    fn test_dispatch_offers_each_case_once() {
        let (tmp, scanner, intake) = setup();
        let case = tmp.path().join("camera001/2025-01-01/case001");
        fs::create_dir_all(&case).unwrap();
        fs::write(case.join("a.jpg"), b"img").unwrap();
        fs::write(case.join("verdict.json"), b"{}").unwrap();

        let paths = vec![case.join("a.jpg"), case.join("verdict.json"), case.clone()];
        let deferred = DashSet::new();
        assert_eq!(dispatch(&scanner, &intake, &paths, &deferred), 1);
        assert_eq!(dispatch(&scanner, &intake, &paths, &deferred), 0);
        assert_eq!(intake.queue().len(), 1);
        assert!(deferred.is_empty());
    }

    #[test]
    fn test_dispatch_ignores_output_folder_and_undecided_cases() {
        let (tmp, scanner, intake) = setup();
        let case = tmp.path().join("camera001/2025-01-01/case001");
        fs::create_dir_all(case.join("ai/processed")).unwrap();
        fs::write(case.join("a.jpg"), b"img").unwrap();

        let deferred = DashSet::new();
        assert_eq!(dispatch(&scanner, &intake, &[case.join("a.jpg")], &deferred), 0);

        fs::write(case.join("verdict.json"), b"{}").unwrap();
        assert_eq!(
            dispatch(&scanner, &intake, &[case.join("ai/processed/a.jpg")], &deferred),
            0
        );
        assert_eq!(intake.dedup().claimed_count(), 0);
    }

    #[test]
    fn test_full_queue_never_blocks_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = CaseScanner::new(tmp.path(), CaseLayout::default());
        let intake = Intake::new(
            Arc::new(DedupTracker::new()),
            Arc::new(WorkQueue::new(1, EnqueuePolicy::Block)),
        );
        let mut cases = Vec::new();
        for id in ["case001", "case002"] {
            let case = tmp.path().join("camera001/2025-01-01").join(id);
            fs::create_dir_all(&case).unwrap();
            fs::write(case.join("a.jpg"), b"img").unwrap();
            fs::write(case.join("verdict.json"), b"{}").unwrap();
            cases.push(case);
        }
        let deferred = Arc::new(DashSet::new());

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        {
            let (scanner, intake, deferred) = (scanner.clone(), intake.clone(), Arc::clone(&deferred));
            let paths = vec![cases[0].join("a.jpg"), cases[1].join("a.jpg")];
            thread::spawn(move || {
                let _ = done_tx.send(dispatch(&scanner, &intake, &paths, &deferred));
            });
        }
        let queued = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("dispatch blocked on a full queue");
        assert_eq!(queued, 1);
        assert!(deferred.contains(&cases[1]));
        assert_eq!(intake.dedup().claimed_count(), 1);

        assert_eq!(retry_deferred(&scanner, &intake, &deferred), 0);
        assert!(deferred.contains(&cases[1]));

        intake.queue().receiver().recv().unwrap();
        assert_eq!(retry_deferred(&scanner, &intake, &deferred), 1);
        assert!(deferred.is_empty());
        assert_eq!(intake.queue().len(), 1);
    }
}
