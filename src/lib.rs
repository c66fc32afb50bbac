pub mod config;
pub mod dedup;
pub mod detector;
pub mod engine;
pub mod error;
pub mod intake;
pub mod model;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod storage;
pub mod watcher;
pub mod worker;

pub use config::AppConfig;
pub use engine::{IntakeEngine, ListFilter, RunSummary};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
