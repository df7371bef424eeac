use anyhow::Result;
use clap::Parser;

use codeportal::Config;
use codeportal::cli::{self, Cli, Commands};
use codeportal::paths::Paths;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Initialize logging: RUST_LOG wins, then --verbose, then the configured level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        configured_log_level().unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args).await,
        Commands::Config(args) => cli::config::run(args).await,
        Commands::Paths => cli::paths::run(),
    }
}

/// Logging level from the config file, when one exists and parses.
/// Reads the file directly rather than through `Config::load`, which
/// would create it on first run.
fn configured_log_level() -> Option<String> {
    let paths = Paths::resolve().ok()?;
    let content = std::fs::read_to_string(paths.config_file()).ok()?;
    let config: Config = serde_json::from_str(&content).ok()?;
    Some(config.logging.level)
}
