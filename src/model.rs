use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Plate text recorded when no detector could read a plate.
pub const UNKNOWN_PLATE: &str = "UNKNOWN";

/// Method recorded when the whole detector chain was exhausted.
pub const METHOD_NONE: &str = "none";

/// Method recorded for images that never reached the detector chain.
pub const METHOD_STAGE: &str = "stage";

/// `(camera, date, case)` taken from the last three segments of a case path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseIdentity {
    pub camera_id: String,
    pub date: String,
    pub case_id: String,
}

impl CaseIdentity {
    pub fn new(camera_id: &str, date: &str, case_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            date: date.to_string(),
            case_id: case_id.to_string(),
        }
    }

    pub fn from_case_path(path: &Path) -> Option<Self> {
        let case_id = path.file_name()?.to_str()?;
        let date_dir = path.parent()?;
        let date = date_dir.file_name()?.to_str()?;
        let camera_id = date_dir.parent()?.file_name()?.to_str()?;
        Some(Self::new(camera_id, date, case_id))
    }
}

impl fmt::Display for CaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.camera_id, self.date, self.case_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    AlreadyProcessed,
    MissingDecisionRecord,
}

/// A directory matching the case shape: at least one image as a direct child.
#[derive(Debug, Clone)]
pub struct CaseDirectory {
    pub identity: CaseIdentity,
    pub path: PathBuf,
    pub image_paths: Vec<PathBuf>,
    pub has_decision_record: bool,
    pub has_output_marker: bool,
    pub output_dir: PathBuf,
}

impl CaseDirectory {
    pub fn eligibility(&self) -> Eligibility {
        if self.has_output_marker {
            Eligibility::AlreadyProcessed
        } else if !self.has_decision_record {
            Eligibility::MissingDecisionRecord
        } else {
            Eligibility::Eligible
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligibility() == Eligibility::Eligible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    NoPlate,
    Error,
}

/// One plate read (or failed attempt) for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub image: String,
    #[serde(rename = "plate")]
    pub plate_text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub method: String,
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Detection {
    pub fn candidate(
        image: &str,
        plate_text: Option<String>,
        confidence: f32,
        bbox: BoundingBox,
        method: &str,
    ) -> Self {
        Self {
            image: image.to_string(),
            plate_text: plate_text
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_PLATE.to_string()),
            confidence: clamp_confidence(confidence),
            bbox,
            method: method.to_string(),
            status: DetectionStatus::Success,
            error: None,
        }
    }

    pub fn no_plate(image: &str) -> Self {
        Self {
            image: image.to_string(),
            plate_text: UNKNOWN_PLATE.to_string(),
            confidence: 0.0,
            bbox: BoundingBox::default(),
            method: METHOD_NONE.to_string(),
            status: DetectionStatus::NoPlate,
            error: None,
        }
    }

    pub fn failed(image: &str, method: &str, error: impl fmt::Display) -> Self {
        Self {
            image: image.to_string(),
            plate_text: UNKNOWN_PLATE.to_string(),
            confidence: 0.0,
            bbox: BoundingBox::default(),
            method: method.to_string(),
            status: DetectionStatus::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn has_known_plate(&self) -> bool {
        self.plate_text != UNKNOWN_PLATE
    }

    /// Only these may become the best detection of a case.
    pub fn is_plate_read(&self) -> bool {
        self.has_known_plate() && self.error.is_none()
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Outcome of one image across staging and the detector chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Success,
    NoPlate,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub original_path: PathBuf,
    pub staged_path: Option<PathBuf>,
    pub digest: Option<String>,
    pub status: ImageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub success_count: usize,
    pub error_count: usize,
    pub no_plate_count: usize,
}

impl Summary {
    pub fn from_images(images: &[ImageRecord]) -> Self {
        images.iter().fold(Summary::default(), |mut s, img| {
            match img.status {
                ImageStatus::Success => s.success_count += 1,
                ImageStatus::Error => s.error_count += 1,
                ImageStatus::NoPlate => s.no_plate_count += 1,
            }
            s
        })
    }

    pub fn total(&self) -> usize {
        self.success_count + self.error_count + self.no_plate_count
    }
}

/// Aggregate over one processed case. Serialized as the results document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    #[serde(flatten)]
    pub identity: CaseIdentity,
    pub case_path: PathBuf,
    pub output_dir: PathBuf,
    pub processed_at: DateTime<Local>,
    pub images_total: usize,
    pub images: Vec<ImageRecord>,
    pub detections: Vec<Detection>,
    pub best_detection: Option<Detection>,
    pub plate_number: Option<String>,
    pub confidence: f32,
    pub summary: Summary,
    pub detector_chain: Vec<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<serde_json::Value>,
}

impl CaseResult {
    /// Builds the aggregate: best detection and summary are derived, never passed in.
    pub fn assemble(
        case: &CaseDirectory,
        images: Vec<ImageRecord>,
        detections: Vec<Detection>,
        detector_chain: Vec<String>,
    ) -> Self {
        let best_detection = select_best(&detections).cloned();
        let summary = Summary::from_images(&images);
        Self {
            identity: case.identity.clone(),
            case_path: case.path.clone(),
            output_dir: case.output_dir.clone(),
            processed_at: Local::now(),
            images_total: images.len(),
            plate_number: best_detection.as_ref().map(|d| d.plate_text.clone()),
            confidence: best_detection.as_ref().map(|d| d.confidence).unwrap_or(0.0),
            best_detection,
            images,
            detections,
            summary,
            detector_chain,
            duration_ms: 0,
            decision: None,
        }
    }

    pub fn methods_used(&self) -> Vec<String> {
        let mut methods: Vec<String> = Vec::new();
        for d in &self.detections {
            if !methods.contains(&d.method) {
                methods.push(d.method.clone());
            }
        }
        methods
    }

    pub fn plates_found(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| d.status == DetectionStatus::Success)
            .count()
    }
}

/// Stable arg-max by confidence over plate reads: ties keep the first seen.
pub fn select_best(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for d in detections.iter().filter(|d| d.is_plate_read()) {
        match best {
            Some(b) if d.confidence <= b.confidence => {}
            _ => best = Some(d),
        }
    }
    best
}
