//! eth-tx-sync CLI
//!
//! Keeps a CSV of daily Ethereum transaction counts current in cold storage.

mod cli;
mod config;
mod data;
mod models;
mod source;
mod storage;
mod sync;

use tracing_subscriber::EnvFilter;


fn main() {
    init_logging();

    if let Err(e) = cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}


/// Progress goes to stderr so stdout carries only the status line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
