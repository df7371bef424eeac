use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Override the configured port
    #[arg(short, long, env = "CODEPORTAL_PORT")]
    pub port: Option<u16>,

    /// Override the configured bind address
    #[arg(short, long, env = "CODEPORTAL_BIND")]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = Config::load()?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    println!("Starting CodePortal...");
    println!(
        "  Server: http://{}:{}",
        config.server.bind, config.server.port
    );
    println!(
        "  Mode: {}",
        if config.public_mode {
            "public (API key + allow-list)"
        } else {
            "local-only"
        }
    );
    println!(
        "  Auto-shutdown after {} minutes without requests",
        config.idle_timeout_minutes
    );
    println!("\nEdit {} and restart to change settings", config.paths.config_file().display());

    let server = Server::new(&config)?;
    server.run().await
}
