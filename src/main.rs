//! modhost - modular application kernel.
//!
//! Entry point for the `modhost` binary: loads configuration, sets up
//! logging and hands off to the selected subcommand.

mod cli;
mod commands;
mod register;

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::Parser;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use modhost_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use crate::cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Console output goes to stderr so stdout stays clean for command results.
    let console = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    let file = match &logging.directory {
        Some(dir) => Some(fmt::layer().with_writer(file_writer(dir)?).with_ansi(false)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

fn file_writer(dir: &Path) -> Result<NonBlocking, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("modhost")
        .filename_suffix("log")
        .max_log_files(30)
        .build(dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The worker flushes on drop, so the guard lives for the whole process.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = GUARD.set(guard);

    Ok(non_blocking)
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn Error>> {
    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    if let Some(root) = &cli.modules_root {
        config.modules.root = root.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("modhost: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("modhost: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let report = ConfigValidator::validate(&config);
    for warning in &report.warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }

    let outcome = match cli.command {
        Some(Commands::Check) => commands::check(&report),
        _ if !report.is_valid() => commands::check(&report),
        None | Some(Commands::Run) => commands::run(&config).await,
        Some(Commands::Manifest) => commands::manifest(&config).await,
        Some(Commands::Dispatch { name, params }) => {
            commands::dispatch(&config, &name, params.as_deref()).await
        }
        Some(Commands::Modules { format }) => commands::modules(&config, format).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
