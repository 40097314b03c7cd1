pub mod cli;
pub mod config;
pub mod export; // CSV, XLSX and plaintext writers for completed forms
pub mod form; // Schema, values, form state and merge precedence
pub mod llm;
pub mod pipeline;
pub mod pipeline_config;
pub mod session;
pub mod summary; // Desired-contract viewpoint summary
pub mod text_loader;

use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<(), cli::CliError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(io::stderr)
        .init();

    let args = cli::Args::parse();
    tracing::info!(
        version = config::APP_VERSION,
        input = ?args.input,
        "Starting {}",
        config::APP_NAME
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    cli::execute(&args, &mut stdin.lock(), &mut stdout.lock())
}
