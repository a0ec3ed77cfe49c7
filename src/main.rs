//! ppmap - Port Pipe MAPer.

use clap::Parser;
use ppmap::{run_bridge, Cli, ExitCode};
use tracing_subscriber::EnvFilter;

fn main() {
    // Usage errors exit with status 2 from here.
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.bridge_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid arguments");
            std::process::exit(e.exit_code().into());
        }
    };
    tracing::debug!(?config, "bridge configuration");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to create tokio runtime");
            std::process::exit(ExitCode::InitFailed.into());
        }
    };

    let result = runtime.block_on(run_bridge(&config));
    // A channel open still blocked on its FIFO must not hold up exit.
    runtime.shutdown_background();

    match result {
        Ok(report) => {
            report.log();
            std::process::exit(ExitCode::Success.into());
        }
        Err(e) => {
            tracing::error!(error = %e, "bridge setup failed");
            std::process::exit(e.exit_code().into());
        }
    }
}
