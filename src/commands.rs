//! Subcommand handlers.

use std::error::Error;
use std::process::ExitCode;

use serde_json::Value;
use tracing::{error, info, warn};

use modhost_config::{Config, ValidationResult};
use modhost_core::{Kernel, ModuleSummary};
use modhost_protocols::{CommandEnvelope, Parameters};

use crate::cli::OutputFormat;
use crate::register::{Mode, build_kernel};

/// Host modules until Ctrl-C or a shutdown request.
pub(crate) async fn run(config: &Config) -> Result<ExitCode, Box<dyn Error>> {
    info!("Starting modhost v{}", env!("CARGO_PKG_VERSION"));
    info!(root = %config.modules.root.display(), "Module root");

    let kernel = build_kernel(config, Mode::Serve).await?;
    let mut shutdown = kernel.shutdown_signal().subscribe();
    kernel.start().await?;

    let loaded = kernel.loader().list_modules();
    info!(modules = loaded.len(), "modhost running, press Ctrl-C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown signal received");
        }
        _ = shutdown.recv() => info!("Shutdown requested"),
    }

    kernel.stop().await?;
    info!("modhost stopped");
    Ok(ExitCode::SUCCESS)
}

/// Print the capability manifest as JSON.
pub(crate) async fn manifest(config: &Config) -> Result<ExitCode, Box<dyn Error>> {
    let kernel = started(config).await?;
    let entries = kernel.manifest();
    kernel.stop().await?;

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(ExitCode::SUCCESS)
}

/// Send one command and print the result envelope.
pub(crate) async fn dispatch(
    config: &Config,
    name: &str,
    params: Option<&str>,
) -> Result<ExitCode, Box<dyn Error>> {
    let parameters = parse_params(params)?;

    let kernel = started(config).await?;
    let result = kernel
        .dispatch(CommandEnvelope::new(name).with_parameters(parameters))
        .await;
    kernel.stop().await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// List discovered modules.
pub(crate) async fn modules(
    config: &Config,
    format: OutputFormat,
) -> Result<ExitCode, Box<dyn Error>> {
    let kernel = started(config).await?;
    let summaries = kernel.loader().list_modules();
    kernel.stop().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Table => print!("{}", render_table(&summaries)),
    }
    Ok(ExitCode::SUCCESS)
}

/// Report configuration problems.
pub(crate) fn check(report: &ValidationResult) -> Result<ExitCode, Box<dyn Error>> {
    for e in &report.errors {
        error!("{}", e);
    }
    if report.is_valid() {
        println!("configuration ok ({} warnings)", report.warnings.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("configuration has {} errors", report.errors.len());
        Ok(ExitCode::FAILURE)
    }
}

async fn started(config: &Config) -> Result<Kernel, Box<dyn Error>> {
    let kernel = build_kernel(config, Mode::OneShot).await?;
    kernel.start().await?;
    Ok(kernel)
}

fn parse_params(raw: Option<&str>) -> Result<Parameters, String> {
    let Some(raw) = raw else {
        return Ok(Parameters::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("--params must be a JSON object".to_string()),
        Err(e) => Err(format!("--params is not valid JSON: {}", e)),
    }
}

fn render_table(summaries: &[ModuleSummary]) -> String {
    if summaries.is_empty() {
        return "no modules\n".to_string();
    }

    let mut out = format!(
        "{:<20} {:<10} {:<10} {:<10} {:>8} {:>5}\n",
        "ID", "VERSION", "BOUNDARY", "STATE", "HANDLERS", "JOBS"
    );
    for m in summaries {
        out.push_str(&format!(
            "{:<20} {:<10} {:<10} {:<10} {:>8} {:>5}\n",
            m.id,
            m.version.as_deref().unwrap_or("-"),
            m.boundary.as_deref().unwrap_or("-"),
            m.state.to_string(),
            m.handlers.len(),
            m.jobs.len(),
        ));
        if let Some(err) = &m.error {
            out.push_str(&format!("  error: {}\n", err));
        }
    }
    out
}
