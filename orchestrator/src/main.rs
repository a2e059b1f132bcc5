use anyhow::Result;
use clap::Parser;

mod args;
mod handlers;
mod server;
mod upload;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    sheetforge_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::run_server(args).await,
    }
}
