mod cli;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    cirerun::output::print_banner();

    info!("Starting cirerun - TeamCity build re-trigger tool");
    cli.execute().await?;

    Ok(())
}
