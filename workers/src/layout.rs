//! Layout worker (§4.2): detects semantic layout regions. Supplementary —
//! never retries; always reports its sheet's slot done so a down container
//! can never stall the pipeline (§4.1 "layout failures are absorbed").

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_nats::jetstream;
use sheetforge_common::blobstore::BlobStoreClient;
use sheetforge_core::container::ContainerClient;
use sheetforge_core::errors::StageError;
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::{LayoutJob, subjects};
use sheetforge_core::paths::sheet_png_path;
use sheetforge_core::tenancy::TenantKey;
use sheetforge_coordinator_client::CoordinatorClient;
use tokio_util::sync::CancellationToken;

use crate::args::WorkerArgs;
use crate::consumer::{self, Outcome};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Deps {
    blob_store: BlobStoreClient,
    container: ContainerClient,
    coordinator: CoordinatorClient,
    emitter: JetStreamEventEmitter,
}

pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let blob_store = BlobStoreClient::connect(&args.blob_store)
        .await
        .context("failed to connect to blob store")?;
    let container = ContainerClient::new(args.container.endpoint.clone(), args.container.timeout_ms);
    let coordinator = CoordinatorClient::new(args.coordinator.endpoint.clone());

    let nats = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");
    let jetstream = jetstream::new(nats);
    let emitter = JetStreamEventEmitter::new(jetstream.clone(), args.events_stream_prefix.clone());

    let deps = Arc::new(Deps {
        blob_store,
        container,
        coordinator,
        emitter,
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        sheetforge_common::shutdown::shutdown_signal().await;
        signal_cancel.cancel();
    });
    sheetforge_common::signal_ready();

    let consumer_name = args.consumer_name.clone().unwrap_or_else(|| "layout".to_string());
    consumer::run::<LayoutJob, _, _>(
        jetstream,
        &args.stream_name,
        subjects::LAYOUT,
        &consumer_name,
        cancel,
        move |job| {
            let deps = deps.clone();
            async move { handle(&deps, job).await }
        },
    )
    .await
}

/// Never returns `Outcome::Retry`: layout detection is supplementary, so any
/// failure still reports the sheet's slot done and acks the message.
async fn handle(deps: &Deps, job: LayoutJob) -> Outcome {
    if let Err(e) = process(deps, &job).await {
        tracing::warn!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "layout detection failed; absorbing");
    }
    if let Err(e) = deps.coordinator.sheet_layout_detected(&job.plan_id, &job.sheet_id).await {
        tracing::error!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "failed to report sheet slot");
    }
    Outcome::Ack
}

async fn process(deps: &Deps, job: &LayoutJob) -> Result<(), StageError> {
    let tenant = TenantKey::new(
        job.organization_id.clone(),
        job.project_id.clone(),
        job.plan_id.clone(),
    );
    let path = sheet_png_path(&tenant, &job.sheet_id);

    let png_bytes = deps
        .blob_store
        .get(&path)
        .await
        .map_err(StageError::transient)?
        .to_vec();

    let detected = deps
        .container
        .detect_layout(&job.plan_id, &job.sheet_id, png_bytes, Some(Duration::from_secs(60)))
        .await?;

    let regions = serde_json::to_value(&detected.regions).map_err(StageError::permanent)?;
    let event = Event::SheetLayoutRegionsDetected {
        sheet_id: job.sheet_id.clone(),
        regions,
        detected_at: now_ms(),
    };
    if let Err(e) = deps.emitter.commit(&job.organization_id, event).await {
        tracing::error!(?e, sheet_id = %job.sheet_id, "failed to commit sheetLayoutRegionsDetected event; swallowing");
    }

    Ok(())
}
