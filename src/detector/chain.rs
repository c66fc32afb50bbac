use super::{DetectionError, Detector, PlateCandidate};
use crate::model::{Detection, ImageStatus};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Ordered detection strategies, tried per image until one finds a plate.
#[derive(Clone)]
pub struct DetectorChain {
    detectors: Vec<Arc<dyn Detector>>,
    timeout: Option<Duration>,
}

/// All detections one image produced plus its resulting status.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub detections: Vec<Detection>,
    pub status: ImageStatus,
}

impl DetectorChain {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, timeout: Option<Duration>) -> Self {
        Self { detectors, timeout }
    }

    pub fn names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run the chain on one image.
    ///
    /// The first detector returning a non-empty list wins and later ones are not
    /// invoked. Failures leave an error detection and fall through. When nothing
    /// is found the image gets a single `UNKNOWN` detection with method `none`.
    pub fn run(&self, image_name: &str, image: &Path) -> ChainOutcome {
        let mut detections: Vec<Detection> = Vec::new();
        let mut clean_runs = 0usize;

        for detector in &self.detectors {
            match self.invoke(detector, image) {
                Ok(candidates) if !candidates.is_empty() => {
                    debug!(
                        "{}: {} candidate(s) from '{}'",
                        image_name,
                        candidates.len(),
                        detector.name()
                    );
                    detections.extend(candidates.into_iter().map(|c| {
                        Detection::candidate(image_name, c.plate, c.confidence, c.bbox, detector.name())
                    }));
                    return ChainOutcome {
                        detections,
                        status: ImageStatus::Success,
                    };
                }
                Ok(_) => {
                    debug!("{}: nothing from '{}'", image_name, detector.name());
                    clean_runs += 1;
                }
                Err(err) => {
                    warn!(
                        "Detector '{}' failed on {}: {}",
                        detector.name(),
                        image_name,
                        err
                    );
                    detections.push(Detection::failed(image_name, detector.name(), &err));
                }
            }
        }

        detections.push(Detection::no_plate(image_name));
        let status = if clean_runs == 0 && !self.detectors.is_empty() {
            ImageStatus::Error
        } else {
            ImageStatus::NoPlate
        };
        ChainOutcome { detections, status }
    }

    fn invoke(
        &self,
        detector: &Arc<dyn Detector>,
        image: &Path,
    ) -> Result<Vec<PlateCandidate>, DetectionError> {
        let limit = match self.timeout {
            Some(limit) => limit,
            None => return guarded_detect(detector.as_ref(), image),
        };

        // The detector thread is left to finish on its own when it overruns.
        let (tx, rx) = bounded(1);
        let worker = Arc::clone(detector);
        let path: PathBuf = image.to_path_buf();
        thread::Builder::new()
            .name(format!("detect-{}", detector.name()))
            .spawn(move || {
                let _ = tx.send(guarded_detect(worker.as_ref(), &path));
            })?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DetectionError::Timeout(limit)),
            Err(RecvTimeoutError::Disconnected) => Err(DetectionError::Panicked(
                "detector thread exited without a result".into(),
            )),
        }
    }
}

fn guarded_detect(
    detector: &dyn Detector,
    image: &Path,
) -> Result<Vec<PlateCandidate>, DetectionError> {
    catch_unwind(AssertUnwindSafe(|| detector.detect(image)))
        .unwrap_or_else(|payload| Err(DetectionError::Panicked(panic_message(payload))))
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, DetectionStatus, METHOD_NONE, UNKNOWN_PLATE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Found(&'static str, f32),
        Empty,
        Fail,
        Panic,
        Slow(Duration),
    }

    struct Scripted {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Detector for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn detect(&self, _image: &Path) -> Result<Vec<PlateCandidate>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Found(plate, confidence) => Ok(vec![PlateCandidate {
                    plate: Some(plate.to_string()),
                    confidence: *confidence,
                    bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
                }]),
                Behaviour::Empty => Ok(vec![]),
                Behaviour::Fail => Err(DetectionError::Process("model missing".into())),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Slow(d) => {
                    thread::sleep(*d);
                    Ok(vec![PlateCandidate {
                        plate: Some("LATE".into()),
                        confidence: 0.9,
                        bbox: BoundingBox::default(),
                    }])
                }
            }
        }
    }

    fn chain_of(detectors: &[Arc<Scripted>], timeout: Option<Duration>) -> DetectorChain {
        DetectorChain::new(
            detectors
                .iter()
                .map(|d| Arc::clone(d) as Arc<dyn Detector>)
                .collect(),
            timeout,
        )
    }

    #[test]
    fn test_short_circuit_on_first_success() {
        let a = Scripted::new("a", Behaviour::Found("1234567", 0.8));
        let b = Scripted::new("b", Behaviour::Found("7654321", 0.9));
        let c = Scripted::new("c", Behaviour::Empty);
        let chain = chain_of(&[a.clone(), b.clone(), c.clone()], None);

        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::Success);
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].method, "a");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_falls_through_and_is_recorded() {
        let a = Scripted::new("a", Behaviour::Fail);
        let b = Scripted::new("b", Behaviour::Empty);
        let c = Scripted::new("c", Behaviour::Found("1111111", 0.5));
        let chain = chain_of(&[a, b, c], None);

        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::Success);
        assert_eq!(outcome.detections.len(), 2);
        assert_eq!(outcome.detections[0].status, DetectionStatus::Error);
        assert!(outcome.detections[0].error.is_some());
        assert_eq!(outcome.detections[1].method, "c");
    }

    #[test]
    fn test_exhausted_chain_yields_unknown() {
        let chain = chain_of(
            &[Scripted::new("a", Behaviour::Empty), Scripted::new("b", Behaviour::Empty)],
            None,
        );
        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::NoPlate);
        assert_eq!(outcome.detections.len(), 1);
        let d = &outcome.detections[0];
        assert_eq!(d.plate_text, UNKNOWN_PLATE);
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.method, METHOD_NONE);
    }

    #[test]
    fn test_all_failures_mark_image_as_error() {
        let chain = chain_of(
            &[Scripted::new("a", Behaviour::Fail), Scripted::new("b", Behaviour::Panic)],
            None,
        );
        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::Error);
        assert_eq!(outcome.detections.len(), 3);
        assert!(outcome.detections[1]
            .error
            .as_deref()
            .unwrap()
            .contains("boom"));
    }

    #[test]
    fn test_timeout_moves_to_next_detector() {
        let slow = Scripted::new("slow", Behaviour::Slow(Duration::from_millis(500)));
        let quick = Scripted::new("quick", Behaviour::Found("2222222", 0.7));
        let chain = chain_of(&[slow, quick], Some(Duration::from_millis(50)));

        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::Success);
        assert_eq!(outcome.detections[0].method, "slow");
        assert_eq!(outcome.detections[0].status, DetectionStatus::Error);
        assert_eq!(outcome.detections[1].plate_text, "2222222");
    }

    #[test]
    fn test_empty_chain_reports_no_plate() {
        let chain = DetectorChain::new(vec![], None);
        let outcome = chain.run("img.jpg", Path::new("img.jpg"));
        assert_eq!(outcome.status, ImageStatus::NoPlate);
        assert_eq!(outcome.detections.len(), 1);
    }
}
