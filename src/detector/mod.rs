//! Plate detection strategies and the ordered chain that combines them.
//!
//! A [`Detector`] is an opaque capability: given an image it returns zero or
//! more plate candidates, or fails. Backends are registered in priority order;
//! one that is unavailable at startup is left out of the chain instead of
//! failing the service.

mod chain;
mod command;
mod heuristic;
mod simulated;

pub use chain::{ChainOutcome, DetectorChain};
pub(crate) use chain::panic_message;
pub use command::CommandDetector;
pub use heuristic::HeuristicDetector;
pub use simulated::SimulatedDetector;

use crate::config::DetectorConfig;
use crate::model::BoundingBox;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// One plate found by a detector. `plate_text` is `None` when the plate was
/// located but not read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlateCandidate {
    #[serde(alias = "plate_text", alias = "text")]
    pub plate: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, deserialize_with = "bbox_from_array")]
    pub bbox: BoundingBox,
}

fn bbox_from_array<'de, D>(deserializer: D) -> Result<BoundingBox, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Vec<f32>> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some([x, y, w, h]) => BoundingBox::new(*x, *y, *w, *h),
        _ => BoundingBox::default(),
    })
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Detector process failed: {0}")]
    Process(String),

    #[error("Malformed detector output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Detector panicked: {0}")]
    Panicked(String),
}

pub trait Detector: Send + Sync {
    /// Recorded as the `method` of every detection this backend produces.
    fn name(&self) -> &str;

    fn detect(&self, image: &Path) -> Result<Vec<PlateCandidate>, DetectionError>;
}

/// Build the chain from configuration, in listed order, skipping any backend
/// that cannot run on this machine.
pub fn build_chain(configs: &[DetectorConfig], timeout: Option<Duration>) -> DetectorChain {
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

    for config in configs {
        let detector: Result<Arc<dyn Detector>, DetectionError> = match config {
            DetectorConfig::Command {
                name,
                program,
                args,
                requires,
            } => CommandDetector::new(name, program, args, requires)
                .map(|d| Arc::new(d.with_timeout(timeout)) as Arc<dyn Detector>),
            DetectorConfig::Heuristic(settings) => {
                Ok(Arc::new(HeuristicDetector::new(settings.clone())) as Arc<dyn Detector>)
            }
            DetectorConfig::Simulated { name } => {
                Ok(Arc::new(SimulatedDetector::new(name)) as Arc<dyn Detector>)
            }
        };

        match detector {
            Ok(d) => {
                info!("Detector '{}' registered at priority {}", d.name(), detectors.len());
                detectors.push(d);
            }
            Err(e) => warn!("Leaving detector out of the chain: {}", e),
        }
    }

    if detectors.is_empty() {
        warn!("No detector available; every image will be recorded without a plate");
    }

    DetectorChain::new(detectors, timeout)
}
