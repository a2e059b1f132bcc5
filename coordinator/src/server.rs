use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use deadpool_postgres::Pool;
use sheetforge_common::shutdown::shutdown_signal;
use sheetforge_core::events::JetStreamEventEmitter;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

use crate::alarm::AlarmRegistry;
use crate::args::ServerArgs;
use crate::dispatch::JobDispatcher;
use crate::handlers;
use crate::registry::PlanRegistry;

/// Shared application state, cheap to clone: everything behind it is
/// `Arc`-backed or a connection pool handle.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub dispatcher: JobDispatcher,
    pub emitter: JetStreamEventEmitter,
    pub registry: PlanRegistry,
    pub alarms: AlarmRegistry,
    pub default_timeout_ms: i64,
}

/// Run the coordinator RPC server.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    let pool = sheetforge_common::postgres::create_pool(args.postgres).await;
    crate::db::init_schema(&pool)
        .await
        .context("failed to initialize coordinator schema")?;

    let nats = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");
    let jetstream = async_nats::jetstream::new(nats);

    let dispatcher = JobDispatcher::new(jetstream.clone(), args.stream_name.clone());
    dispatcher
        .ensure_stream()
        .await
        .context("failed to ensure jobs stream")?;

    let emitter = JetStreamEventEmitter::new(jetstream, args.events_stream_prefix.clone());
    let registry = PlanRegistry::new();
    let root_token = tokio_util::sync::CancellationToken::new();
    let alarms = AlarmRegistry::new(root_token.clone());

    let state = AppState {
        pool,
        dispatcher,
        emitter,
        registry,
        alarms,
        default_timeout_ms: args.default_timeout_ms,
    };

    crate::plan::rearm_non_terminal_plans(&state).await?;

    sheetforge_common::metrics::maybe_spawn_metrics_server();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::health))
        .route("/plans/{plan_id}/initialize", post(handlers::initialize))
        .route("/plans/{plan_id}/state", get(handlers::get_state))
        .route("/plans/{plan_id}/progress", get(handlers::get_progress))
        .route(
            "/plans/{plan_id}/sheetImageGenerated",
            post(handlers::sheet_image_generated),
        )
        .route(
            "/plans/{plan_id}/sheetMetadataExtracted",
            post(handlers::sheet_metadata_extracted),
        )
        .route(
            "/plans/{plan_id}/sheetCalloutsDetected",
            post(handlers::sheet_callouts_detected),
        )
        .route(
            "/plans/{plan_id}/sheetLayoutDetected",
            post(handlers::sheet_layout_detected),
        )
        .route(
            "/plans/{plan_id}/sheetTilesGenerated",
            post(handlers::sheet_tiles_generated),
        )
        .route("/plans/{plan_id}/markFailed", post(handlers::mark_failed))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    tracing::info!(%addr, "starting coordinator RPC server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    sheetforge_common::signal_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            root_token.cancel();
        })
        .await?;
    tracing::info!("coordinator server stopped gracefully");
    Ok(())
}
