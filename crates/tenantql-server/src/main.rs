//! tenantql command line
//!
//! Translates canonical SQL for a tenant, optionally runs it against the
//! tenant's DuckDB file, and manages the mapping cache.

use clap::Parser;

mod commands;
mod config;
mod llm;
mod logging;

use commands::Cli;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables (.env holds the API key)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    logging::init(&config.logging);

    tracing::debug!(config = %cli.config.display(), "Configuration loaded");
    commands::run(cli.command, &config).await
}
