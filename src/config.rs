use crate::error::Error;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

const ENV_PREFIX: &str = "PLATE_INTAKE";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest_root: PathBuf,
    pub decision_record: String,
    pub output_dir: String,
    pub camera_prefix: String,
    pub case_prefix: String,
    pub image_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub workers: usize,
    pub queue_capacity: usize,
    pub enqueue_policy: EnqueuePolicy,
    pub watch_grace_ms: u64,
    pub detector_timeout_ms: Option<u64>,
    pub supervisor_tick_ms: u64,
    pub max_worker_restarts: usize,
    pub detectors: Vec<DetectorConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ingest_root: PathBuf::from("/srv/processing_inbox"),
            decision_record: "verdict.json".to_string(),
            output_dir: "ai".to_string(),
            camera_prefix: "camera".to_string(),
            case_prefix: "case".to_string(),
            image_extensions: ["jpg", "jpeg", "png", "bmp", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: Vec::new(),
            workers: 2,
            queue_capacity: 64,
            enqueue_policy: EnqueuePolicy::Block,
            watch_grace_ms: 2000,
            detector_timeout_ms: None,
            supervisor_tick_ms: 500,
            max_worker_restarts: 5,
            detectors: vec![DetectorConfig::Heuristic(HeuristicSettings::default())],
        }
    }
}

/// What `enqueue` does when the work queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueuePolicy {
    Block,
    FailFast,
}

/// One entry of the ordered detector chain. Order in the list is priority order.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    Command {
        name: String,
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        requires: Vec<PathBuf>,
    },
    Heuristic(HeuristicSettings),
    Simulated {
        #[serde(default = "default_simulated_name")]
        name: String,
    },
}

fn default_simulated_name() -> String {
    "simulation".to_string()
}

/// Tuning for the contour-geometry heuristic.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeuristicSettings {
    pub blur_sigma: f32,
    pub edge_threshold: u16,
    pub min_edge_pixels: usize,
    pub min_area: u32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub max_candidates: usize,
}

impl Default for HeuristicSettings {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            edge_threshold: 120,
            min_edge_pixels: 20,
            min_area: 1000,
            min_aspect: 1.5,
            max_aspect: 8.0,
            max_candidates: 1,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.decision_record.is_empty() || self.output_dir.is_empty() {
            return Err(Error::InvalidConfig(
                "decision_record and output_dir must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn watch_grace(&self) -> Duration {
        Duration::from_millis(self.watch_grace_ms)
    }

    pub fn detector_timeout(&self) -> Option<Duration> {
        self.detector_timeout_ms.map(Duration::from_millis)
    }

    pub fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms.max(10))
    }

    pub fn layout(&self) -> CaseLayout {
        let ignore_patterns = self
            .ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        CaseLayout {
            decision_record: self.decision_record.clone(),
            output_dir: self.output_dir.clone(),
            camera_prefix: self.camera_prefix.clone(),
            case_prefix: self.case_prefix.clone(),
            image_extensions: self
                .image_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore_patterns,
        }
    }
}

/// Naming rules of the case tree, shared by the scanner, watcher and store.
#[derive(Debug, Clone)]
pub struct CaseLayout {
    pub decision_record: String,
    pub output_dir: String,
    pub camera_prefix: String,
    pub case_prefix: String,
    pub image_extensions: Vec<String>,
    pub ignore_patterns: Vec<Pattern>,
}

impl Default for CaseLayout {
    fn default() -> Self {
        AppConfig::default().layout()
    }
}

impl CaseLayout {
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.image_extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }
}

/// Load configuration from defaults, an optional config file and `PLATE_INTAKE__*`
/// environment variables, in that order of precedence.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
