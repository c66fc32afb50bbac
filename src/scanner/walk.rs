use super::case_dir::inspect_case_dir;
use crate::config::CaseLayout;
use crate::error::Error;
use crate::model::CaseDirectory;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

const CAMERA_DEPTH: usize = 1;
const DATE_DEPTH: usize = 2;
const CASE_DEPTH: usize = 3;

/// Walks `root/<camera>/<date>/<case>/` and yields every directory of case shape.
///
/// The scanner only reads. Each call to [`CaseScanner::scan`] starts a fresh walk,
/// so a sweep can be repeated at any time.
#[derive(Debug, Clone)]
pub struct CaseScanner {
    root: PathBuf,
    layout: CaseLayout,
}

impl CaseScanner {
    pub fn new(root: impl Into<PathBuf>, layout: CaseLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &CaseLayout {
        &self.layout
    }

    /// Lazy sweep of the tree. Fails up front only when the root is missing;
    /// unreadable directories below it are logged and skipped.
    ///
    /// Symlinked camera, date or case folders are followed. Dangling links and
    /// link loops count as unreadable.
    pub fn scan(&self) -> Result<impl Iterator<Item = CaseDirectory> + '_, Error> {
        if !self.root.is_dir() {
            return Err(Error::RootMissing(self.root.clone()));
        }

        let walker = WalkDir::new(&self.root)
            .min_depth(CASE_DEPTH)
            .max_depth(CASE_DEPTH)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.wanted(entry));

        Ok(walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    let scan_err = Error::Scan {
                        path,
                        message: err.to_string(),
                    };
                    warn!("Skipping: {}", scan_err);
                    return None;
                }
            };
            if !entry.file_type().is_dir() {
                return None;
            }
            match inspect_case_dir(entry.path(), &self.layout) {
                Ok(Some(case)) => Some(case),
                Ok(None) => {
                    trace!("No images in {}, skipping", entry.path().display());
                    None
                }
                Err(err) => {
                    warn!("Skipping unreadable case {}: {}", entry.path().display(), err);
                    None
                }
            }
        }))
    }

    /// Re-validate a single directory the way a sweep would see it.
    pub fn inspect(&self, case_path: &Path) -> Result<Option<CaseDirectory>, Error> {
        if !self.is_case_path(case_path) {
            return Ok(None);
        }
        inspect_case_dir(case_path, &self.layout).map_err(|err| Error::Scan {
            path: case_path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// True when `path` sits exactly at case depth below the root and every
    /// segment matches the naming rules.
    pub fn is_case_path(&self, path: &Path) -> bool {
        let relative = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) => return false,
        };
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.len() != CASE_DEPTH || self.layout.is_ignored(path) {
            return false;
        }
        segments
            .iter()
            .enumerate()
            .all(|(i, name)| self.segment_matches(i + 1, name))
    }

    /// Resolve any path inside the tree to the case directory that contains it.
    pub fn case_dir_for(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let depth = relative.components().count();
        if depth < CASE_DEPTH {
            return None;
        }
        let mut case_dir = path.to_path_buf();
        for _ in CASE_DEPTH..depth {
            case_dir = case_dir.parent()?.to_path_buf();
        }
        Some(case_dir)
    }

    fn wanted(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if !entry.file_type().is_dir() || self.layout.is_ignored(entry.path()) {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        self.segment_matches(entry.depth(), &name)
    }

    fn segment_matches(&self, depth: usize, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        match depth {
            CAMERA_DEPTH => name.starts_with(&self.layout.camera_prefix),
            DATE_DEPTH => true,
            CASE_DEPTH => name.starts_with(&self.layout.case_prefix),
            _ => false,
        }
    }
}
