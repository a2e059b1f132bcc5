//! Callout worker (§4.2): detects callout markers and, when present, grid
//! bubbles on a valid sheet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_nats::jetstream;
use sheetforge_common::blobstore::BlobStoreClient;
use sheetforge_core::container::ContainerClient;
use sheetforge_core::errors::StageError;
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::{CalloutJob, subjects};
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

    let consumer_name = args.consumer_name.clone().unwrap_or_else(|| "callout".to_string());
    consumer::run::<CalloutJob, _, _>(
        jetstream,
        &args.stream_name,
        subjects::CALLOUT,
        &consumer_name,
        cancel,
        move |job| {
            let deps = deps.clone();
            async move { handle(&deps, job).await }
        },
    )
    .await
}

async fn handle(deps: &Deps, job: CalloutJob) -> Outcome {
    match process(deps, &job).await {
        Ok(()) => Outcome::Ack,
        Err(StageError::TransientExternal(e)) => {
            tracing::warn!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "callout transient failure");
            Outcome::Retry
        }
        Err(e) => {
            tracing::warn!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "callout permanent failure; reporting sheet slot done");
            if let Err(e) = deps.coordinator.sheet_callouts_detected(&job.plan_id, &job.sheet_id).await {
                tracing::error!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "failed to report sheet slot");
            }
            Outcome::Ack
        }
    }
}

async fn process(deps: &Deps, job: &CalloutJob) -> Result<(), StageError> {
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
        .detect_callouts(
            &job.plan_id,
            &job.sheet_id,
            &job.sheet_number,
            &job.valid_sheet_numbers,
            png_bytes,
            Some(Duration::from_secs(60)),
        )
        .await?;

    let markers = serde_json::to_value(&detected.markers).map_err(StageError::permanent)?;
    let event = Event::SheetCalloutsDetected {
        sheet_id: job.sheet_id.clone(),
        plan_id: job.plan_id.clone(),
        markers,
        unmatched_count: detected.unmatched_count,
        detected_at: now_ms(),
    };
    if let Err(e) = deps.emitter.commit(&job.organization_id, event).await {
        tracing::error!(?e, sheet_id = %job.sheet_id, "failed to commit sheetCalloutsDetected event; swallowing");
    }

    if let Some(bubbles) = detected.grid_bubbles.filter(|b| !b.is_empty()) {
        let bubbles_value = serde_json::to_value(&bubbles).map_err(StageError::permanent)?;
        let event = Event::SheetGridBubblesDetected {
            sheet_id: job.sheet_id.clone(),
            bubbles: bubbles_value,
            detected_at: now_ms(),
        };
        if let Err(e) = deps.emitter.commit(&job.organization_id, event).await {
            tracing::error!(?e, sheet_id = %job.sheet_id, "failed to commit sheetGridBubblesDetected event; swallowing");
        }
    }

    deps.coordinator
        .sheet_callouts_detected(&job.plan_id, &job.sheet_id)
        .await
        .map_err(StageError::transient)?;

    Ok(())
}
