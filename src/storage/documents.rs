use crate::model::CaseResult;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `logs/processing_log.json`: counts and methods of one processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub case_directory: PathBuf,
    pub processed_at: DateTime<Local>,
    pub total_images: usize,
    pub successful_detections: usize,
    pub failed_detections: usize,
    pub no_plates_detected: usize,
    pub total_plates_found: usize,
    pub methods_used: Vec<String>,
    pub best_plate: Option<String>,
    pub duration_ms: u64,
}

impl From<&CaseResult> for ProcessingLog {
    fn from(result: &CaseResult) -> Self {
        Self {
            case_directory: result.case_path.clone(),
            processed_at: result.processed_at,
            total_images: result.images_total,
            successful_detections: result.summary.success_count,
            failed_detections: result.summary.error_count,
            no_plates_detected: result.summary.no_plate_count,
            total_plates_found: result.plates_found(),
            methods_used: result.methods_used(),
            best_plate: result.plate_number.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// Paths written by one successful persist.
#[derive(Debug, Clone)]
pub struct PersistedPaths {
    pub results: PathBuf,
    pub log: PathBuf,
}
