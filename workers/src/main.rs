use anyhow::Result;
use clap::Parser;

mod args;
mod callout;
mod consumer;
mod image_gen;
mod layout;
mod metadata;
mod tiles;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    sheetforge_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ImageGen(args) => image_gen::run(args).await,
        Commands::Metadata(args) => metadata::run(args).await,
        Commands::Callout(args) => callout::run(args).await,
        Commands::Layout(args) => layout::run(args).await,
        Commands::Tiles(args) => tiles::run(args).await,
    }
}
