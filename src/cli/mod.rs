//! # Command Line Interface
//!
//! Operator commands for the certificate lifecycle: bootstrap the root and
//! the service inventory, issue and rotate single bundles, inspect health,
//! run the monitoring loop, and back up or restore everything.

pub mod commands;
pub mod exit;
pub mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};

use crate::config::AppConfig;
use crate::observability::{init_observability, log_config_info};
use crate::pki::ServiceType;

pub use commands::{execute, CommandContext, CommandReport};
pub use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "meshcert")]
#[command(about = "mTLS certificate lifecycle management")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (YAML or TOML); MESHCERT__* variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Format of the report printed after the summary line
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create or load the root CA, then issue and publish a bundle for every
    /// configured service that lacks a usable one
    Bootstrap,

    /// Issue a new bundle for one service
    Generate {
        /// Service name; becomes the certificate CN and first SAN
        #[arg(long)]
        service: String,

        /// internal-service, api-gateway or device
        #[arg(long = "type", default_value = "internal-service")]
        service_type: ServiceType,

        /// Additional SAN (repeatable)
        #[arg(long = "san")]
        sans: Vec<String>,
    },

    /// Check one or every service and rotate what is due
    #[command(group(ArgGroup::new("target").required(true).args(["service", "all"])))]
    Rotate {
        #[arg(long)]
        service: Option<String>,

        #[arg(long)]
        all: bool,

        /// Rotate now regardless of remaining validity
        #[arg(long)]
        force: bool,
    },

    /// Run one health check and metrics cycle and print the snapshot
    Health,

    /// Run the monitoring cycles for a while and print the final snapshot
    Monitor {
        /// Minutes to run
        #[arg(long, default_value_t = 5)]
        duration: u64,

        /// Also run the rotation sweep
        #[arg(long)]
        rotate: bool,
    },

    /// Write an encrypted backup of the root and every current bundle
    Backup {
        /// Directory to write `meshcert-backup-<timestamp>.mcb` into
        #[arg(long)]
        output: PathBuf,
    },

    /// Restore a backup written by `backup`
    Restore {
        #[arg(long)]
        input: PathBuf,

        /// Replace existing root material
        #[arg(long)]
        force: bool,
    },
}

/// Parse arguments, run the command and map the result to an exit code.
pub async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(exit::CONFIG);
        }
    };
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }

    let metrics = match init_observability(&config.observability) {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(exit::CONFIG);
        }
    };
    log_config_info(&config);

    let context = CommandContext::new(config, metrics);
    match execute(&context, cli.command).await {
        Ok(report) => match output::print_report(&report.summary, &report.body, cli.format) {
            Ok(()) => ExitCode::from(report.exit_code),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(exit::OTHER)
            }
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit::code_for_error(&e))
        }
    }
}
