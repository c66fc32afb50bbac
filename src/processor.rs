use crate::detector::{panic_message, DetectorChain};
use crate::error::Error;
use crate::model::{
    CaseDirectory, CaseResult, Detection, ImageRecord, ImageStatus, METHOD_NONE, METHOD_STAGE,
};
use crate::storage::{PersistedPaths, ResultStore};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};

/// Turns one eligible case into a persisted [`CaseResult`].
#[derive(Clone)]
pub struct CaseProcessor {
    chain: Arc<DetectorChain>,
    store: ResultStore,
    decision_record: String,
}

/// What processing one case produced. `persisted` is `Err` when the results
/// document could not be written; the case then stays eligible.
#[derive(Debug)]
pub struct CaseOutcome {
    pub result: CaseResult,
    pub persisted: Result<PersistedPaths, Error>,
}

impl CaseOutcome {
    pub fn is_complete(&self) -> bool {
        self.persisted.is_ok()
    }
}

impl CaseProcessor {
    pub fn new(chain: Arc<DetectorChain>, decision_record: &str) -> Self {
        Self {
            chain,
            store: ResultStore::new(),
            decision_record: decision_record.to_string(),
        }
    }

    pub fn chain(&self) -> &DetectorChain {
        &self.chain
    }

    /// Process a case end to end. Never fails: per-image problems become error
    /// detections and a persist failure is carried in the outcome.
    pub fn process(&self, case: &CaseDirectory) -> CaseOutcome {
        let span = info_span!("case", id = %case.identity);
        let _entered = span.enter();
        let start = Instant::now();
        info!(
            "Processing {} image(s) in {}",
            case.image_paths.len(),
            case.path.display()
        );

        if let Err(e) = self.store.prepare(case) {
            warn!("Could not create output folders: {}", e);
        }

        let mut images = Vec::with_capacity(case.image_paths.len());
        let mut detections = Vec::new();
        for source in &case.image_paths {
            let (record, found) = catch_unwind(AssertUnwindSafe(|| self.process_image(case, source)))
                .unwrap_or_else(|payload| {
                    let name = file_name(source);
                    let message = panic_message(payload);
                    error!("Panic while processing {}: {}", name, message);
                    (
                        ImageRecord {
                            filename: name.clone(),
                            original_path: source.clone(),
                            staged_path: None,
                            digest: None,
                            status: ImageStatus::Error,
                        },
                        vec![Detection::failed(&name, METHOD_NONE, message)],
                    )
                });
            images.push(record);
            detections.extend(found);
        }

        let mut result = CaseResult::assemble(case, images, detections, self.chain.names());
        result.decision = self.read_decision(&case.path);
        result.duration_ms = start.elapsed().as_millis() as u64;

        match &result.best_detection {
            Some(best) => info!(
                "Best plate {} ({:.2}) from {} via {}",
                best.plate_text, best.confidence, best.image, best.method
            ),
            None => info!("No plate read in {} image(s)", result.images_total),
        }

        let persisted = self.store.persist(case, &result);
        if let Err(e) = &persisted {
            error!("Results not saved, case stays eligible: {}", e);
        }

        CaseOutcome { result, persisted }
    }

    fn process_image(&self, case: &CaseDirectory, source: &Path) -> (ImageRecord, Vec<Detection>) {
        let name = file_name(source);
        let mut record = ImageRecord {
            filename: name.clone(),
            original_path: source.to_path_buf(),
            staged_path: None,
            digest: None,
            status: ImageStatus::Error,
        };

        let staged = match self.store.stage_image(case, source) {
            Ok(staged) => staged,
            Err(e) => {
                warn!("{}", e);
                return (record, vec![Detection::failed(&name, METHOD_STAGE, &e)]);
            }
        };

        let outcome = self.chain.run(&name, &staged.path);
        debug!("{}: {:?} with {} detection(s)", name, outcome.status, outcome.detections.len());
        record.staged_path = Some(staged.path);
        record.digest = Some(staged.digest);
        record.status = outcome.status;
        (record, outcome.detections)
    }

    fn read_decision(&self, case_path: &Path) -> Option<serde_json::Value> {
        let path = case_path.join(&self.decision_record);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Decision record {} is not JSON: {}", path.display(), e);
                None
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
