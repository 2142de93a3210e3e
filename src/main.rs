//! Entry point: load configuration, initialize logging, hand off to
//! `membership_agent::run`.

use std::env;

use membership_agent::config::Config;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("membership-agent {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);

    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    if let Err(err) = membership_agent::run(config).await {
        error!(error = %err, "agent exited with an error");
        std::process::exit(1);
    }
}
