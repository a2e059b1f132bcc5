use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    #[arg(long, env = "NATS_URL", required = true)]
    pub nats_url: String,

    #[arg(long, env = "NATS_USER", default_value = "app")]
    pub nats_user: String,

    #[arg(long, env = "NATS_PASSWORD", default_value = "devpass")]
    pub nats_password: String,
}

impl NatsArgs {
    pub async fn connect(&self) -> anyhow::Result<async_nats::Client> {
        use anyhow::Context;

        async_nats::ConnectOptions::new()
            .user_and_password(self.nats_user.clone(), self.nats_password.clone())
            .connect(&self.nats_url)
            .await
            .context("failed to connect to NATS")
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,

    #[arg(long, env = "POSTGRES_SSL_MODE", default_value = "prefer")]
    pub postgres_ssl_mode: String,
}

/// Connection settings for the opaque object store (§1 "object storage", out of scope
/// as a system, reachable here only through its S3-compatible wire protocol).
#[derive(Parser, Debug, Clone)]
pub struct BlobStoreArgs {
    #[arg(long, env = "BLOB_BUCKET", required = true)]
    pub bucket: String,

    #[arg(long, env = "BLOB_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "BLOB_REGION", default_value = "us-east-1")]
    pub region: String,
}

/// Connection settings for the stateless compute container (§6).
#[derive(Parser, Debug, Clone)]
pub struct ContainerArgs {
    #[arg(long, env = "CONTAINER_ENDPOINT", required = true)]
    pub endpoint: String,

    /// Per-call deadline in milliseconds; stage-specific overrides are applied
    /// by the caller (suggested: 120s generate/render, 60s detect, 30s metadata).
    #[arg(long, env = "CONTAINER_TIMEOUT_MS", default_value_t = 120_000)]
    pub timeout_ms: u64,
}

/// Endpoint settings shared by clients of the coordinator's RPC surface (§6).
#[derive(Parser, Debug, Clone)]
pub struct CoordinatorArgs {
    #[arg(long, env = "COORDINATOR_ENDPOINT", required = true)]
    pub endpoint: String,
}
