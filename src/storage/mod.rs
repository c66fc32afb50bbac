//! Output artifacts of a case, all under `<case>/<output_dir>/`:
//!
//! * `processed/`: staged copies of the source images
//! * `ai_detection_results.json`: the full [`CaseResult`]; its presence marks the case done
//! * `logs/processing_log.json`: the [`ProcessingLog`]
//!
//! Documents are written to a temp file in the same directory and renamed into
//! place, so readers never see a partial document. A crash mid-write leaves a
//! stray temp file and no marker, and the case stays eligible.

mod documents;

pub use documents::{PersistedPaths, ProcessingLog};

use crate::error::Error;
use crate::model::{CaseDirectory, CaseResult};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RESULTS_FILE: &str = "ai_detection_results.json";
pub const PROCESSED_DIR: &str = "processed";
pub const LOGS_DIR: &str = "logs";
pub const LOG_FILE: &str = "processing_log.json";

/// A source image copied into the output folder.
#[derive(Debug, Clone)]
pub struct StagedImage {
    pub path: PathBuf,
    pub digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResultStore;

impl ResultStore {
    pub fn new() -> Self {
        ResultStore
    }

    pub fn results_path(case: &CaseDirectory) -> PathBuf {
        case.output_dir.join(RESULTS_FILE)
    }

    pub fn log_path(case: &CaseDirectory) -> PathBuf {
        case.output_dir.join(LOGS_DIR).join(LOG_FILE)
    }

    /// Create the output folder structure; a no-op when it already exists.
    pub fn prepare(&self, case: &CaseDirectory) -> Result<(), Error> {
        for dir in [
            case.output_dir.clone(),
            case.output_dir.join(PROCESSED_DIR),
            case.output_dir.join(LOGS_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|source| Error::Stage {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Copy one source image into `processed/` and fingerprint the copy.
    pub fn stage_image(&self, case: &CaseDirectory, source: &Path) -> Result<StagedImage, Error> {
        let file_name = source.file_name().ok_or_else(|| Error::Stage {
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "image path has no file name"),
        })?;
        let target = case.output_dir.join(PROCESSED_DIR).join(file_name);

        let bytes = fs::read(source).map_err(|source_err| Error::Stage {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        fs::write(&target, &bytes).map_err(|source| Error::Stage {
            path: target.clone(),
            source,
        })?;
        let digest = blake3::hash(&bytes).to_hex().to_string();
        debug!("Staged {} -> {}", source.display(), target.display());

        Ok(StagedImage {
            path: target,
            digest,
        })
    }

    /// Write the processing log, then the results document. The results
    /// document goes last because it is the completion marker.
    pub fn persist(&self, case: &CaseDirectory, result: &CaseResult) -> Result<PersistedPaths, Error> {
        let log = Self::log_path(case);
        let results = Self::results_path(case);

        write_atomic(&log, &ProcessingLog::from(result))?;
        write_atomic(&results, result)?;

        info!("Saved results to {}", results.display());
        Ok(PersistedPaths { results, log })
    }

    /// Read back a persisted result, if the case has one.
    pub fn load(&self, case_path: &Path, output_dir: &str) -> Result<Option<CaseResult>, Error> {
        let path = case_path.join(output_dir).join(RESULTS_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let persist_err = |source: io::Error| Error::Persist {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .ok_or_else(|| persist_err(io::Error::new(io::ErrorKind::InvalidInput, "no parent directory")))?;
    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", stem))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(persist_err)?;
    tmp.write_all(&body).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}
