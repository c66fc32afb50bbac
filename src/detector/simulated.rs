use super::{DetectionError, Detector, PlateCandidate};
use crate::model::BoundingBox;
use std::hash::Hasher as _;
use std::path::Path;
use twox_hash::XxHash64;

const PLATE_PATTERNS: [&str; 20] = [
    "1234567", "2345678", "3456789", "4567890", "5678901", "6789012", "7890123", "8901234",
    "9012345", "0123456", "1111111", "2222222", "3333333", "4444444", "5555555", "1357924",
    "2468135", "9876543", "1122334", "5566778",
];

/// Deterministic stand-in for a recognition model, for installations without one.
///
/// The same image path always yields the same plate, confidence (0.75..=0.94)
/// and box.
#[derive(Debug, Clone)]
pub struct SimulatedDetector {
    name: String,
}

impl SimulatedDetector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Detector for SimulatedDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, image: &Path) -> Result<Vec<PlateCandidate>, DetectionError> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(image.to_string_lossy().as_bytes());
        let hash = hasher.finish();

        let base = PLATE_PATTERNS[(hash % PLATE_PATTERNS.len() as u64) as usize];
        let plate = if hash % 3 == 0 {
            format!("{}-{}", &base[..3], &base[3..])
        } else {
            base.to_string()
        };
        let confidence = 0.75 + (hash % 20) as f32 / 100.0;

        Ok(vec![PlateCandidate {
            plate: Some(plate),
            confidence,
            bbox: BoundingBox::new(
                100.0 + (hash % 50) as f32,
                100.0 + (hash % 30) as f32,
                200.0,
                150.0,
            ),
        }])
    }
}
