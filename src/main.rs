mod cli;
mod logging;
mod reporter;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use colored::*;
use dotenv::dotenv;
use plate_intake::config::load_configuration;
use plate_intake::{AppConfig, IntakeEngine, ListFilter, SilentReporter};
use reporter::CliReporter;
use tracing::{error, info};

fn main() -> ExitCode {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let mut config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Some(root) = args.root.clone() {
        config.ingest_root = root;
    }

    let outcome = match args.command {
        Some(Commands::Scan) => run_scan(config),
        Some(Commands::Process) => run_process(config),
        Some(Commands::Run) => run_service(config),
        Some(Commands::Reprocess { case_dir }) => run_reprocess(config, &case_dir),
        Some(Commands::List {
            camera,
            date,
            search,
        }) => run_list(
            config,
            ListFilter {
                camera,
                date,
                search,
            },
        ),
        Some(Commands::PrintConfig) => print_config(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Error: {:#}", err);
            let fatal = err
                .downcast_ref::<plate_intake::Error>()
                .map_or(true, |e| e.is_fatal());
            if fatal {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}

fn run_scan(config: AppConfig) -> anyhow::Result<()> {
    let engine = IntakeEngine::from_config(config)?;
    let report = engine.scan_once()?;

    for case in &report.eligible {
        println!(
            "{}  {} image(s)  {}",
            case.identity.to_string().cyan(),
            case.image_paths.len(),
            case.path.display()
        );
    }
    println!();
    info!(
        "{} eligible, {} already processed, {} waiting for a decision record",
        format!("{}", report.eligible.len()).green(),
        format!("{}", report.already_processed).yellow(),
        format!("{}", report.missing_decision_record).red(),
    );
    Ok(())
}

fn run_process(config: AppConfig) -> anyhow::Result<()> {
    let engine = IntakeEngine::from_config(config)?;
    info!("Detector chain: {:?}", engine.detector_names());
    let summary = engine.process_all(Arc::new(CliReporter::new()))?;

    println!();
    info!(
        "Cases: {} processed, {} saved, {} failed to save, {} skipped (already processed)",
        format!("{}", summary.totals.processed).green(),
        format!("{}", summary.totals.persisted).green(),
        format!("{}", summary.totals.failed).red(),
        format!("{}", summary.already_processed).yellow(),
    );
    info!(
        "{} image(s), {} plate detection(s) in {}",
        format!("{}", summary.totals.images).cyan(),
        format!("{}", summary.totals.plates).cyan(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
    );
    Ok(())
}

fn run_service(config: AppConfig) -> anyhow::Result<()> {
    let engine = IntakeEngine::from_config(config)?;
    info!("Detector chain: {:?}", engine.detector_names());

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        info!("Stop requested, finishing queued cases...");
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let summary = engine.run_service(stop, Arc::new(SilentReporter))?;
    info!(
        "{} case(s) processed, {} worker restart(s)",
        format!("{}", summary.totals.processed).green(),
        format!("{}", summary.worker_restarts).yellow(),
    );
    Ok(())
}

fn run_reprocess(config: AppConfig, case_dir: &std::path::Path) -> anyhow::Result<()> {
    let engine = IntakeEngine::from_config(config)?;
    let outcome = engine.reprocess(case_dir)?;
    let result = &outcome.result;

    let paths = outcome
        .persisted
        .with_context(|| format!("saving results for {}", result.identity))?;
    info!(
        "{}: plate {} ({:.2}), saved to {}",
        result.identity,
        result.plate_number.as_deref().unwrap_or("none").green(),
        result.confidence,
        paths.results.display()
    );
    Ok(())
}

fn run_list(config: AppConfig, filter: ListFilter) -> anyhow::Result<()> {
    let engine = IntakeEngine::from_config(config)?;
    let results = engine.list_processed(&filter)?;

    for result in &results {
        println!(
            "{}  {}  {:.2}  {}",
            result.identity.to_string().cyan(),
            result.plate_number.as_deref().unwrap_or("-").green(),
            result.confidence,
            result.processed_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    info!("{} processed case(s)", format!("{}", results.len()).green());
    Ok(())
}

fn print_config(config: &AppConfig) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
    println!("{}", rendered);
    Ok(())
}
