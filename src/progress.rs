use crate::model::CaseResult;

/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif; library callers can pass
/// [`SilentReporter`]. All methods have default no-op implementations and may
/// be called from worker threads.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _eligible: usize, _seen: usize, _duration_secs: f64) {}
    fn on_case_queued(&self, _case: &str) {}
    fn on_case_start(&self, _case: &str) {}
    fn on_case_complete(&self, _result: &CaseResult, _persisted: bool) {}
    fn on_run_complete(&self, _processed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
