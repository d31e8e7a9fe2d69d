//! wif-check - Workload Identity Federation troubleshooter for GKE

use std::process::ExitCode;

use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wif_check::cli::Cli;
use wif_check::render;

/// Exit code for errors that prevented a verdict
const EXIT_ERROR: u8 = 2;

fn install_crypto_provider() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow!("failed to install crypto provider: {:?}", e))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = install_crypto_provider() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    match cli.run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Check failed: {}", e);
            if let Some(hint) = render::error_hint(&e) {
                eprintln!("{}", hint);
            }
            ExitCode::from(EXIT_ERROR)
        }
    }
}
