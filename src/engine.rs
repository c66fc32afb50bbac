use crate::config::AppConfig;
use crate::dedup::DedupTracker;
use crate::detector::{self, DetectorChain};
use crate::error::Error;
use crate::intake::{Intake, OfferOutcome};
use crate::model::{CaseDirectory, CaseResult, Eligibility};
use crate::processor::{CaseOutcome, CaseProcessor};
use crate::progress::ProgressReporter;
use crate::queue::WorkQueue;
use crate::scanner::{CaseScanner, ScanReport};
use crate::storage::ResultStore;
use crate::watcher::CaseWatcher;
use crate::worker::{RunTotals, WorkerPool};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Owns the pipeline: scanner, detector chain, dedup tracker, and for each run
/// a queue, a worker pool and (in service mode) a watcher.
pub struct IntakeEngine {
    config: AppConfig,
    scanner: CaseScanner,
    processor: CaseProcessor,
    dedup: Arc<DedupTracker>,
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub cases_seen: usize,
    pub queued: usize,
    pub rejected: usize,
    pub already_processed: usize,
    pub missing_decision_record: usize,
    pub worker_restarts: usize,
    pub totals: RunTotals,
    pub duration: Duration,
}

/// Filters for [`IntakeEngine::list_processed`]. Empty filters match everything.
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub camera: Option<String>,
    pub date: Option<String>,
    pub search: Option<String>,
}

impl ListFilter {
    fn matches_case(&self, case: &CaseDirectory) -> bool {
        self.camera
            .as_deref()
            .map_or(true, |c| case.identity.camera_id == c)
            && self.date.as_deref().map_or(true, |d| case.identity.date == d)
    }

    fn matches_result(&self, result: &CaseResult) -> bool {
        let needle = match self.search.as_deref() {
            Some(s) if !s.is_empty() => s.to_lowercase(),
            _ => return true,
        };
        result.identity.case_id.to_lowercase().contains(&needle)
            || result
                .plate_number
                .as_deref()
                .map_or(false, |p| p.to_lowercase().contains(&needle))
    }
}

impl IntakeEngine {
    pub fn new(config: AppConfig, chain: DetectorChain) -> Result<Self, Error> {
        config.validate()?;
        let root = fs::canonicalize(&config.ingest_root).unwrap_or_else(|_| config.ingest_root.clone());
        let scanner = CaseScanner::new(root, config.layout());
        let processor = CaseProcessor::new(Arc::new(chain), &config.decision_record);
        Ok(Self {
            config,
            scanner,
            processor,
            dedup: Arc::new(DedupTracker::new()),
        })
    }

    /// Build the engine with the detector chain described by the configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, Error> {
        let chain = detector::build_chain(&config.detectors, config.detector_timeout());
        Self::new(config, chain)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.processor.chain().names()
    }

    /// One read-only sweep of the tree.
    pub fn scan_once(&self) -> Result<ScanReport, Error> {
        let start = Instant::now();
        let report = ScanReport::from_cases(self.scanner.scan()?);
        debug!(
            "Scan completed in {:.2}s: {} case(s), {} eligible",
            start.elapsed().as_secs_f64(),
            report.cases_seen(),
            report.eligible.len()
        );
        Ok(report)
    }

    /// Sweep once and process every eligible case, then return.
    pub fn process_all(&self, reporter: Arc<dyn ProgressReporter>) -> Result<RunSummary, Error> {
        let start = Instant::now();

        info!("Scanning {}...", self.root().display());
        reporter.on_scan_start();
        let report = self.scan_once()?;
        reporter.on_scan_complete(
            report.eligible.len(),
            report.cases_seen(),
            start.elapsed().as_secs_f64(),
        );

        let mut summary = RunSummary {
            cases_seen: report.cases_seen(),
            already_processed: report.already_processed,
            missing_decision_record: report.missing_decision_record,
            ..RunSummary::default()
        };

        let queue = Arc::new(WorkQueue::new(
            self.config.queue_capacity,
            self.config.enqueue_policy,
        ));
        let intake = Intake::new(Arc::clone(&self.dedup), Arc::clone(&queue));
        let pool = WorkerPool::start(
            self.config.workers,
            self.processor.clone(),
            Arc::clone(&self.dedup),
            Arc::clone(&queue),
            Arc::clone(&reporter),
        )?;

        info!("Processing {} eligible case(s)...", report.eligible.len());
        for case in report.eligible {
            let label = case.identity.to_string();
            match intake.offer(case) {
                Ok(OfferOutcome::Queued) => {
                    summary.queued += 1;
                    reporter.on_case_queued(&label);
                }
                Ok(OfferOutcome::Rejected) => summary.rejected += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!("Could not queue {}: {}", label, e);
                    break;
                }
            }
        }

        queue.close();
        summary.totals = pool.join();
        summary.duration = start.elapsed();
        reporter.on_run_complete(summary.totals.processed, summary.duration.as_secs_f64());
        info!(
            "Processed {} case(s) in {:.2}s",
            summary.totals.processed,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }

    /// Long-running mode: startup sweep, then watch for new cases until `stop`
    /// is set. Queued work is drained before returning.
    pub fn run_service(
        &self,
        stop: Arc<AtomicBool>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<RunSummary, Error> {
        let start = Instant::now();
        if !self.root().is_dir() {
            return Err(Error::RootMissing(self.root().to_path_buf()));
        }

        let queue = Arc::new(WorkQueue::new(
            self.config.queue_capacity,
            self.config.enqueue_policy,
        ));
        let intake = Intake::new(Arc::clone(&self.dedup), Arc::clone(&queue));
        let mut pool = WorkerPool::start(
            self.config.workers,
            self.processor.clone(),
            Arc::clone(&self.dedup),
            Arc::clone(&queue),
            reporter,
        )?;
        let mut summary = RunSummary::default();

        info!("Startup sweep of {}", self.root().display());
        self.sweep(&intake, &mut summary)?;

        let watcher = match CaseWatcher::start(
            self.scanner.clone(),
            intake.clone(),
            self.config.watch_grace(),
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                queue.close();
                pool.join();
                return Err(e);
            }
        };
        // Cases created between the first sweep and the subscription.
        self.sweep(&intake, &mut RunSummary::default())?;

        let tick = self.config.supervisor_tick();
        let mut outcome = Ok(());
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(tick);
            watcher.retry_deferred();
            if let Err(e) = pool.supervise(self.config.max_worker_restarts) {
                error!("Stopping service: {}", e);
                outcome = Err(e);
                break;
            }
        }

        info!("Shutting down: draining {} queued case(s)", queue.len());
        drop(watcher);
        queue.close();
        summary.worker_restarts = pool.restarts();
        summary.totals = pool.join();
        summary.duration = start.elapsed();
        info!(
            "Service stopped after {:.2}s, {} case(s) processed",
            summary.duration.as_secs_f64(),
            summary.totals.processed
        );
        outcome.map(|_| summary)
    }

    fn sweep(&self, intake: &Intake, summary: &mut RunSummary) -> Result<(), Error> {
        for case in self.scanner.scan()? {
            summary.cases_seen += 1;
            match intake.offer(case)? {
                OfferOutcome::Queued => summary.queued += 1,
                OfferOutcome::Rejected => summary.rejected += 1,
                OfferOutcome::NotEligible(Eligibility::AlreadyProcessed) => {
                    summary.already_processed += 1
                }
                OfferOutcome::NotEligible(_) => summary.missing_decision_record += 1,
                OfferOutcome::AlreadyClaimed | OfferOutcome::Deferred => {}
            }
        }
        Ok(())
    }

    /// Process one case again even though it already has results. The case
    /// still needs its decision record.
    pub fn reprocess(&self, case_path: &Path) -> Result<CaseOutcome, Error> {
        let path = fs::canonicalize(case_path).map_err(|e| Error::Scan {
            path: case_path.to_path_buf(),
            message: e.to_string(),
        })?;
        let case = self.scanner.inspect(&path)?.ok_or_else(|| Error::Scan {
            path: path.clone(),
            message: "not a case directory with images".into(),
        })?;
        if !case.has_decision_record {
            return Err(Error::Scan {
                path,
                message: format!("missing {}", self.config.decision_record),
            });
        }

        info!("Reprocessing {} (forced)", case.identity);
        let outcome = self.processor.process(&case);
        if outcome.is_complete() {
            self.dedup.mark_complete(&case.identity);
        }
        Ok(outcome)
    }

    /// Results of every processed case under the root, in tree order.
    pub fn list_processed(&self, filter: &ListFilter) -> Result<Vec<CaseResult>, Error> {
        let store = ResultStore::new();
        let mut results = Vec::new();
        for case in self
            .scanner
            .scan()?
            .filter(|c| c.has_output_marker && filter.matches_case(c))
        {
            match store.load(&case.path, &self.config.output_dir) {
                Ok(Some(result)) if filter.matches_result(&result) => results.push(result),
                Ok(_) => {}
                Err(e) => warn!("Unreadable results for {}: {}", case.identity, e),
            }
        }
        Ok(results)
    }
}
