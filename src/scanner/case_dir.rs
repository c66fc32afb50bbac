use crate::config::CaseLayout;
use crate::model::{CaseDirectory, CaseIdentity};
use crate::storage::RESULTS_FILE;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Inspect one candidate case directory.
///
/// Returns `Ok(None)` when the directory holds no image (not a case). Images are
/// listed in file-name order so every run over the same case sees the same order.
pub fn inspect_case_dir(path: &Path, layout: &CaseLayout) -> io::Result<Option<CaseDirectory>> {
    let identity = match CaseIdentity::from_case_path(path) {
        Some(identity) => identity,
        None => return Ok(None),
    };

    let mut image_paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let kind = err.io_error().map(|e| e.kind()).unwrap_or(io::ErrorKind::Other);
            io::Error::new(kind, format!("Error listing {}: {}", path.display(), err))
        })?;
        if entry.file_type().is_file() && layout.is_image(entry.path()) {
            image_paths.push(entry.into_path());
        }
    }

    if image_paths.is_empty() {
        return Ok(None);
    }

    let output_dir = path.join(&layout.output_dir);
    Ok(Some(CaseDirectory {
        identity,
        has_decision_record: path.join(&layout.decision_record).is_file(),
        has_output_marker: output_dir.join(RESULTS_FILE).is_file(),
        path: path.to_path_buf(),
        image_paths,
        output_dir,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_images_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let case = tmp.path().join("camera1/2025-01-01/case7");
        fs::create_dir_all(&case).unwrap();
        fs::write(case.join("b.PNG"), b"x").unwrap();
        fs::write(case.join("a.jpg"), b"x").unwrap();
        fs::write(case.join("notes.txt"), b"x").unwrap();
        fs::write(case.join("verdict.json"), b"{}").unwrap();
        fs::create_dir_all(case.join("ai/processed")).unwrap();
        fs::write(case.join("ai/processed/a.jpg"), b"x").unwrap();

        let found = inspect_case_dir(&case, &CaseLayout::default())
            .unwrap()
            .unwrap();
        let names: Vec<_> = found
            .image_paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);
        assert!(found.has_decision_record);
        assert!(!found.has_output_marker);
        assert_eq!(found.output_dir, case.join("ai"));
    }

    #[test]
    fn test_directory_without_images_is_not_a_case() {
        let tmp = tempfile::tempdir().unwrap();
        let case = tmp.path().join("camera1/2025-01-01/case8");
        fs::create_dir_all(&case).unwrap();
        fs::write(case.join("verdict.json"), b"{}").unwrap();
        assert!(inspect_case_dir(&case, &CaseLayout::default())
            .unwrap()
            .is_none());
    }
}
