//! CLI definitions for modhost.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// modhost CLI.
#[derive(Parser)]
#[command(name = "modhost")]
#[command(about = "Modular application kernel hosting independently loadable feature modules")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.modhost/config.toml if present)
    #[arg(short, long, global = true, env = "MODHOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override `[modules] root`
    #[arg(short, long, global = true)]
    pub modules_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Load modules, start the scheduler and run until Ctrl-C (default)
    Run,

    /// Print the capability manifest as JSON
    Manifest,

    /// Dispatch one command and print its result
    Dispatch {
        /// Command name, e.g. `System.Help`
        name: String,

        /// Parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },

    /// List discovered modules and their state
    Modules {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Validate the configuration file
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dispatch_with_params() {
        let cli = Cli::try_parse_from([
            "modhost",
            "--modules-root",
            "/srv/modules",
            "dispatch",
            "Echo.Say",
            "--params",
            r#"{"text":"hi"}"#,
        ])
        .unwrap();

        assert_eq!(cli.modules_root, Some(PathBuf::from("/srv/modules")));
        match cli.command {
            Some(Commands::Dispatch { name, params }) => {
                assert_eq!(name, "Echo.Say");
                assert_eq!(params.as_deref(), Some(r#"{"text":"hi"}"#));
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[test]
    fn test_default_is_no_subcommand() {
        let cli = Cli::try_parse_from(["modhost"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_modules_format() {
        let cli = Cli::try_parse_from(["modhost", "modules", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Modules {
                format: OutputFormat::Json
            })
        ));
    }
}
