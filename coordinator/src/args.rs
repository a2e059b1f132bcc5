use clap::{Parser, Subcommand};
use sheetforge_common::args::{NatsArgs, PostgresArgs};

#[derive(Parser, Debug)]
#[command(name = "sheetforge-coordinator")]
#[command(about = "Per-plan durable state machine for the sheet processing pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator RPC server
    Serve(ServerArgs),
    /// Fetch a plan's current state over the RPC surface
    GetState(GetStateArgs),
    /// Check the coordinator's health endpoint
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub nats: NatsArgs,

    /// Stream name the stage job records are published to.
    #[arg(long, env = "JOBS_STREAM_NAME", default_value = "SHEETFORGE_JOBS")]
    pub stream_name: String,

    /// Stream name prefix the event emitter uses, one stream per organization.
    #[arg(long, env = "EVENTS_STREAM_PREFIX", default_value = "SHEETFORGE_EVENTS")]
    pub events_stream_prefix: String,

    /// Default plan deadline, used when `initialize` omits `timeoutMs`.
    #[arg(long, env = "DEFAULT_TIMEOUT_MS", default_value_t = 1_800_000)]
    pub default_timeout_ms: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct GetStateArgs {
    #[arg(long, env = "COORDINATOR_ENDPOINT")]
    pub endpoint: String,

    #[arg(long)]
    pub plan_id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(long, env = "COORDINATOR_ENDPOINT")]
    pub endpoint: String,
}
