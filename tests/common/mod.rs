#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{GrayImage, Luma};
use plate_intake::config::AppConfig;
use plate_intake::detector::{DetectionError, Detector, DetectorChain, PlateCandidate};
use plate_intake::model::BoundingBox;
use plate_intake::IntakeEngine;

pub const DECISION: &str = "verdict.json";

/// Create `root/<camera>/<date>/<case>/` with the given image files (dummy
/// bytes) and, optionally, a decision record.
pub fn make_case(
    root: &Path,
    camera: &str,
    date: &str,
    case: &str,
    images: &[&str],
    decision: bool,
) -> PathBuf {
    let dir = root.join(camera).join(date).join(case);
    fs::create_dir_all(&dir).unwrap();
    for name in images {
        fs::write(dir.join(name), format!("image bytes of {}", name)).unwrap();
    }
    if decision {
        write_decision(&dir);
    }
    dir
}

pub fn write_decision(case_dir: &Path) {
    fs::write(
        case_dir.join(DECISION),
        br#"{"violation": "red_light", "speed": 72}"#,
    )
    .unwrap();
}

pub fn results_path(case_dir: &Path) -> PathBuf {
    case_dir.join("ai").join("ai_detection_results.json")
}

pub fn read_results(case_dir: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(results_path(case_dir)).unwrap()).unwrap()
}

/// Dark frame with one bright plate-shaped rectangle.
pub fn write_plate_png(path: &Path) {
    let img = GrayImage::from_fn(240, 140, |x, y| {
        if (40..190).contains(&x) && (40..90).contains(&y) {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    img.save(path).unwrap();
}

pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        ingest_root: root.to_path_buf(),
        workers: 2,
        queue_capacity: 16,
        watch_grace_ms: 100,
        supervisor_tick_ms: 20,
        ..AppConfig::default()
    }
}

pub fn engine_with(root: &Path, detectors: Vec<Arc<dyn Detector>>) -> IntakeEngine {
    IntakeEngine::new(test_config(root), DetectorChain::new(detectors, None)).unwrap()
}

/// Reads the plate from the image file name: `ABC123.jpg` -> `ABC123`. Files
/// whose stem starts with `blank` yield nothing, `broken` fails.
pub struct CountingDetector {
    name: String,
    confidence: f32,
    calls: AtomicUsize,
}

impl CountingDetector {
    pub fn new(name: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            confidence,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for CountingDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, image: &Path) -> Result<Vec<PlateCandidate>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.starts_with("broken") {
            return Err(DetectionError::Process("model crashed".into()));
        }
        if stem.starts_with("blank") {
            return Ok(vec![]);
        }
        Ok(vec![PlateCandidate {
            plate: Some(stem),
            confidence: self.confidence,
            bbox: BoundingBox::new(10.0, 20.0, 120.0, 40.0),
        }])
    }
}

pub fn as_detectors(list: &[Arc<CountingDetector>]) -> Vec<Arc<dyn Detector>> {
    list.iter()
        .map(|d| Arc::clone(d) as Arc<dyn Detector>)
        .collect()
}
