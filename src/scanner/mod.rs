mod case_dir;
mod walk;

pub use case_dir::inspect_case_dir;
pub use walk::CaseScanner;

use crate::model::{CaseDirectory, Eligibility};

/// Counts and eligible cases of one sweep.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub eligible: Vec<CaseDirectory>,
    pub already_processed: usize,
    pub missing_decision_record: usize,
}

impl ScanReport {
    pub fn from_cases(cases: impl Iterator<Item = CaseDirectory>) -> Self {
        let mut report = ScanReport::default();
        for case in cases {
            match case.eligibility() {
                Eligibility::Eligible => report.eligible.push(case),
                Eligibility::AlreadyProcessed => report.already_processed += 1,
                Eligibility::MissingDecisionRecord => report.missing_decision_record += 1,
            }
        }
        report
    }

    pub fn cases_seen(&self) -> usize {
        self.eligible.len() + self.already_processed + self.missing_decision_record
    }
}
