//! vetta-flash - Provision, build, flash and monitor Vetta firmware
//!
//! Generates a fresh AP password, stores it in the SPIFFS image source and
//! the operator archive, then runs make, spiffsgen.py, esptool.py and the
//! serial monitor in order. The first failing step stops the run.

mod cli;
mod error;
mod pipeline;
mod runner;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Steps run one at a time; the runtime only waits on a child and Ctrl-C
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ERROR: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(err) = rt.block_on(cli::run(cli)) {
        eprintln!("ERROR: {:#}", err);
        std::process::exit(error::exit_code(&err));
    }
}
