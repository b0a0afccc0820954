use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deckel::cli::Cli;

/// Log filtering follows `RUST_LOG` when set, e.g.:
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=deckel=trace` - Show trace for this crate only
/// Logs go to stderr so CSV exports on stdout stay clean.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "deckel=debug,sqlx=warn"
    } else {
        "deckel=info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.run().await
}
