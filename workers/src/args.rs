use clap::{Parser, Subcommand};
use sheetforge_common::args::{BlobStoreArgs, ContainerArgs, CoordinatorArgs, NatsArgs};

#[derive(Parser, Debug)]
#[command(name = "sheetforge-workers")]
#[command(about = "Stage worker consumers for the sheet processing pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render PDF pages to per-sheet PNGs
    ImageGen(WorkerArgs),
    /// Extract per-sheet metadata
    Metadata(WorkerArgs),
    /// Detect callouts and grid bubbles
    Callout(WorkerArgs),
    /// Detect layout regions
    Layout(WorkerArgs),
    /// Generate the PMTiles pyramid
    Tiles(WorkerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct WorkerArgs {
    #[clap(flatten)]
    pub nats: NatsArgs,

    #[clap(flatten)]
    pub blob_store: BlobStoreArgs,

    #[clap(flatten)]
    pub container: ContainerArgs,

    #[clap(flatten)]
    pub coordinator: CoordinatorArgs,

    /// NATS JetStream stream carrying the stage job records.
    #[arg(long, env = "JOBS_STREAM_NAME", default_value = "SHEETFORGE_JOBS")]
    pub stream_name: String,

    /// Stream name prefix the event emitter uses, one stream per organization.
    #[arg(long, env = "EVENTS_STREAM_PREFIX", default_value = "SHEETFORGE_EVENTS")]
    pub events_stream_prefix: String,

    /// Durable consumer name for this stage; stable across restarts so the
    /// backlog resumes instead of replaying from the start.
    #[arg(long, env = "CONSUMER_NAME")]
    pub consumer_name: Option<String>,
}
