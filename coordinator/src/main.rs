use anyhow::{Context, Result};
use clap::Parser;

mod alarm;
mod args;
mod db;
mod dispatch;
mod handlers;
mod plan;
mod registry;
mod server;

use args::{Cli, Commands, GetStateArgs, HealthArgs};

#[tokio::main]
async fn main() -> Result<()> {
    sheetforge_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::run_server(args).await,
        Commands::GetState(args) => run_get_state(args).await,
        Commands::Health(args) => run_health(args).await,
    }
}

async fn run_get_state(args: GetStateArgs) -> Result<()> {
    let client = sheetforge_coordinator_client::CoordinatorClient::new(args.endpoint);
    let state = client
        .get_state(&args.plan_id)
        .await
        .context("failed to fetch plan state")?;
    match state {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => {
            eprintln!("plan {} not found", args.plan_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run_health(args: HealthArgs) -> Result<()> {
    let response = reqwest::get(format!("{}/healthz", args.endpoint))
        .await
        .context("failed to reach coordinator health endpoint")?;
    if response.status().is_success() {
        println!("OK");
        Ok(())
    } else {
        eprintln!("unhealthy: {}", response.status());
        std::process::exit(1);
    }
}
