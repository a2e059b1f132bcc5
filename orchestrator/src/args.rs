use clap::{Parser, Subcommand};
use sheetforge_common::args::{BlobStoreArgs, NatsArgs};

#[derive(Parser, Debug)]
#[command(name = "sheetforge-orchestrator")]
#[command(about = "Upload entry point for the sheet processing pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the upload entry server
    Serve(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub nats: NatsArgs,

    #[clap(flatten)]
    pub blob_store: BlobStoreArgs,

    /// Stream name the stage job records are published to.
    #[arg(long, env = "JOBS_STREAM_NAME", default_value = "SHEETFORGE_JOBS")]
    pub stream_name: String,

    /// Stream name prefix the event emitter uses, one stream per organization.
    #[arg(long, env = "EVENTS_STREAM_PREFIX", default_value = "SHEETFORGE_EVENTS")]
    pub events_stream_prefix: String,
}
