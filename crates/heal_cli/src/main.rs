//! heal CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Run aborted by a fatal error
//! - 4: Issue failures (with `--fail-on-issue-errors`)

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, CliError, Commands, LogFormat};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const RUN_ABORTED: u8 = 3;
    pub const ISSUE_FAILURES: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Issues(args) => commands::issues::execute(args).await,
        Commands::Report(args) => commands::report::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("heal=debug,info")
    } else if cli.quiet {
        EnvFilter::new("heal=warn,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()))
    };

    let (text, json) = match cli.log_format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let log_result = tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

fn default_filter() -> &'static str {
    "heal=info,warn"
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(cli_error) = e.downcast_ref::<CliError>() {
        return match cli_error {
            CliError::InvalidConfig(_) | CliError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
            CliError::RunAborted(_) => ExitCodes::RUN_ABORTED,
            CliError::IssueFailures(_) => ExitCodes::ISSUE_FAILURES,
            CliError::ReportNotFound(_) => ExitCodes::GENERAL_ERROR,
        };
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("argument") || msg.contains("invalid config") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
