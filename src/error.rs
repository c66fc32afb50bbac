use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Ingest root does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("Error reading {}: {message}", path.display())]
    Scan { path: PathBuf, message: String },

    #[error("Error staging {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error persisting {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify_debouncer_mini::notify::Error),

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Work queue is full")]
    QueueFull,

    #[error("Worker pool exceeded its restart budget of {0}")]
    WorkersExhausted(usize),
}

impl Error {
    /// Errors that must stop the service (and set a non-zero exit status).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RootMissing(_)
                | Error::InvalidConfig(_)
                | Error::Config(_)
                | Error::Watcher(_)
                | Error::WorkersExhausted(_)
        )
    }
}
