mod common;

use std::fs;
use std::sync::Arc;

use common::{as_detectors, make_case, read_results, write_plate_png, CountingDetector, DECISION};
use plate_intake::config::{CaseLayout, HeuristicSettings};
use plate_intake::detector::{Detector, DetectorChain, HeuristicDetector};
use plate_intake::model::{DetectionStatus, ImageStatus, UNKNOWN_PLATE};
use plate_intake::processor::CaseProcessor;
use plate_intake::scanner::inspect_case_dir;
use tempfile::tempdir;

fn processor(detectors: Vec<Arc<dyn Detector>>) -> CaseProcessor {
    CaseProcessor::new(Arc::new(DetectorChain::new(detectors, None)), DECISION)
}

#[test]
fn test_all_detectors_failing_still_completes_case() {
    let tmp = tempdir().unwrap();
    let dir = make_case(
        tmp.path(),
        "camera001",
        "2025-01-01",
        "case001",
        &["broken_1.jpg", "broken_2.jpg"],
        true,
    );
    let case = inspect_case_dir(&dir, &CaseLayout::default()).unwrap().unwrap();
    let a = CountingDetector::new("custom_model", 0.9);
    let b = CountingDetector::new("alpr_model", 0.8);

    let outcome = processor(as_detectors(&[a.clone(), b.clone()])).process(&case);
    assert!(outcome.is_complete());
    let result = outcome.result;
    assert!(result.best_detection.is_none());
    assert!(result.plate_number.is_none());
    assert_eq!(result.summary.error_count, 2);
    assert_eq!(result.summary.total(), result.images_total);
    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 2);
    // Two errors and one UNKNOWN fallback per image.
    assert_eq!(result.detections.len(), 6);
    assert!(read_results(&dir)["best_detection"].is_null());
}

#[test]
fn test_best_detection_is_earliest_highest_confidence() {
    let tmp = tempdir().unwrap();
    let dir = make_case(
        tmp.path(),
        "camera001",
        "2025-01-01",
        "case001",
        &["a_first.jpg", "b_second.jpg", "c_blank.jpg"],
        true,
    );
    let case = inspect_case_dir(&dir, &CaseLayout::default()).unwrap().unwrap();
    let detector = CountingDetector::new("custom_model", 0.9);

    let result = processor(as_detectors(&[detector])).process(&case).result;
    let best = result.best_detection.as_ref().unwrap();
    assert_eq!(best.image, "a_first.jpg");
    assert_eq!(result.plate_number.as_deref(), Some("a_first"));
    assert_eq!(result.confidence, 0.9);
    assert_eq!(result.summary.success_count, 3);
    assert_eq!(result.images.len(), 3);
}

#[test]
fn test_images_are_processed_in_name_order_and_staged() {
    let tmp = tempdir().unwrap();
    let dir = make_case(
        tmp.path(),
        "camera001",
        "2025-01-01",
        "case001",
        &["z.jpg", "m.jpeg", "a.png"],
        true,
    );
    let case = inspect_case_dir(&dir, &CaseLayout::default()).unwrap().unwrap();
    let result = processor(vec![]).process(&case).result;

    let names: Vec<_> = result.images.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, vec!["a.png", "m.jpeg", "z.jpg"]);
    for image in &result.images {
        let staged = image.staged_path.as_ref().unwrap();
        assert_eq!(fs::read(staged).unwrap(), fs::read(&image.original_path).unwrap());
        assert_eq!(image.digest.as_ref().unwrap().len(), 64);
        assert_eq!(image.status, ImageStatus::NoPlate);
    }
    assert_eq!(result.summary.no_plate_count, 3);
}

#[test]
fn test_heuristic_locates_but_never_becomes_best() {
    let tmp = tempdir().unwrap();
    let dir = make_case(tmp.path(), "camera001", "2025-01-01", "case001", &[], true);
    write_plate_png(&dir.join("frame.png"));
    let case = inspect_case_dir(&dir, &CaseLayout::default()).unwrap().unwrap();

    let heuristic = Arc::new(HeuristicDetector::new(HeuristicSettings::default())) as Arc<dyn Detector>;
    let result = processor(vec![heuristic]).process(&case).result;

    assert_eq!(result.detections.len(), 1);
    let d = &result.detections[0];
    assert_eq!(d.method, "contour_heuristic");
    assert_eq!(d.plate_text, UNKNOWN_PLATE);
    assert_eq!(d.status, DetectionStatus::Success);
    assert!(d.confidence > 0.0);
    assert!(result.best_detection.is_none());
    assert_eq!(result.summary.success_count, 1);
}

#[test]
fn test_decision_record_is_embedded() {
    let tmp = tempdir().unwrap();
    let dir = make_case(tmp.path(), "camera001", "2025-01-01", "case001", &["a.jpg"], true);
    let case = inspect_case_dir(&dir, &CaseLayout::default()).unwrap().unwrap();
    processor(vec![]).process(&case);

    let doc = read_results(&dir);
    assert_eq!(doc["decision"]["violation"], "red_light");
    assert_eq!(doc["summary"]["no_plate_count"], 1);
    assert!(dir.join("ai/logs/processing_log.json").is_file());
}
