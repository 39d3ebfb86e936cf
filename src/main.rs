//! actionflow CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use actionflow::cli::Cli;
use actionflow::config;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins, then the config file's log_filter, then "info"
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = config::config()
            .ok()
            .and_then(|cfg| cfg.log_filter.clone())
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    cli.execute().await
}
