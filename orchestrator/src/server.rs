use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use sheetforge_common::blobstore::BlobStoreClient;
use sheetforge_common::shutdown::shutdown_signal;
use sheetforge_core::events::JetStreamEventEmitter;
use tower_http::cors::{Any, CorsLayer};

use crate::args::ServerArgs;
use crate::handlers;
use crate::upload::UploadHandler;

/// Shared application state, cheap to clone: the blob store and upload
/// handler are themselves thin handles over pooled clients.
#[derive(Clone)]
pub struct AppState {
    pub blob_store: BlobStoreClient,
    pub upload_handler: UploadHandler,
    pub bucket: String,
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let blob_store = BlobStoreClient::connect(&args.blob_store)
        .await
        .context("failed to connect to blob store")?;

    let nats = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");
    let jetstream = async_nats::jetstream::new(nats);

    let emitter = JetStreamEventEmitter::new(jetstream.clone(), args.events_stream_prefix.clone());
    let upload_handler = UploadHandler::new(jetstream, args.stream_name.clone(), emitter);
    upload_handler
        .ensure_stream()
        .await
        .context("failed to ensure jobs stream")?;

    let state = AppState {
        blob_store,
        upload_handler,
        bucket: args.blob_store.bucket.clone(),
    };

    sheetforge_common::metrics::maybe_spawn_metrics_server();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::health))
        .route("/upload-notifications", post(handlers::upload_notification))
        .route("/uploads", post(handlers::uploads))
        .layer(axum::middleware::from_fn(
            sheetforge_common::middleware::create_context,
        ))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    tracing::info!(%addr, "starting orchestrator server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    sheetforge_common::signal_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("orchestrator server stopped gracefully");
    Ok(())
}
