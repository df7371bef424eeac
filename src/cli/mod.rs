pub mod config;
pub mod paths;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "codeportal")]
#[command(author, version, about = "Materialize AI-generated file bundles as structured projects")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve(serve::ServeArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}
