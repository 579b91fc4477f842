//! Sends a test event, and optionally a transaction, to check that Sentry
//! can be reached with the current configuration.

use std::env;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tnet_sentry::connectivity::{self, StdConsole, TestArgs};
use tnet_sentry::{Client, ReportingConfig};

// Diagnostics of the test client are echoed by the routine itself.
const DEFAULT_FILTERS: &str = "warn,tnet_sentry=off";

/// Generate a test event and send it to Sentry.
#[derive(Parser, Debug)]
#[command(name = "sentry-test", version)]
struct Cli {
    /// The DSN to use; defaults to the `SENTRY_DSN` environment variable
    #[arg(long)]
    dsn: Option<String>,
    /// Also send a test transaction
    #[arg(long)]
    transaction: bool,
    /// Print the debug and info messages of the client
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut log_builder = pretty_env_logger::formatted_builder();
    log_builder.parse_filters(
        &env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTERS.to_owned()),
    );
    log_builder.init();

    let args = TestArgs {
        dsn: cli.dsn,
        transaction: cli.transaction,
        verbose: cli.verbose,
    };
    let configured = || ReportingConfig::from_env().and_then(Client::new);

    match connectivity::run(&args, configured, Arc::new(StdConsole)) {
        Ok(_) => process::exit(0),
        Err(failure) => process::exit(failure.exit_code()),
    }
}
