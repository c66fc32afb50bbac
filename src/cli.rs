use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "plate-intake")]
#[command(about = "Case intake and license-plate detection pipeline", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./Config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ingest root, overriding the configured one
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List eligible cases without processing them
    Scan,
    /// Process every eligible case once, then exit
    Process,
    /// Run as a service: sweep, then watch for new cases until Ctrl-C
    Run,
    /// Force processing of one case, even if it already has results
    Reprocess {
        /// Path of the case directory
        case_dir: PathBuf,
    },
    /// List processed cases and their best plate
    List {
        #[arg(long)]
        camera: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Case-insensitive match on plate number or case id
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the effective configuration
    PrintConfig,
}
