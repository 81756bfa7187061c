#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! geocore server entry point.
//!
//! ```text
//! geocore_server            # HTTP API with embedded delivery worker
//! geocore_server serve
//! geocore_server worker     # delivery worker only
//! geocore_server migrate    # apply migrations and exit
//! ```
//!
//! All settings come from the environment; see [`ServerConfig::from_env`].

use clap::{Parser, Subcommand};
use geocore_server::{ServerConfig, run_migrate, run_server, run_worker};

#[derive(Parser)]
#[command(
    name = "geocore_server",
    about = "Danger zone geofencing API and webhook delivery worker"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and deliver webhooks in the same process
    Serve,
    /// Only deliver queued webhooks
    Worker,
    /// Apply database migrations and exit
    Migrate,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let config = ServerConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await?,
        Commands::Worker => run_worker(config).await?,
        Commands::Migrate => run_migrate(&config).await?,
    }

    Ok(())
}
