//! Image-gen worker (§4.2): the hardest stage. Reads the source PDF, asks the
//! container to discover the sheet layout and render each page, writes the
//! per-sheet PNGs, initializes the coordinator, and reports one
//! `sheetImageGenerated` per sheet as its PNG lands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_nats::jetstream;
use base64::Engine;
use sheetforge_common::blobstore::BlobStoreClient;
use sheetforge_core::container::ContainerClient;
use sheetforge_core::errors::StageError;
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::{ImageGenJob, subjects};
use sheetforge_core::paths::sheet_png_path;
use sheetforge_core::tenancy::TenantKey;
use sheetforge_coordinator_client::{CoordinatorClient, InitializeRequest};
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

    let consumer_name = args.consumer_name.clone().unwrap_or_else(|| "image-gen".to_string());
    consumer::run::<ImageGenJob, _, _>(
        jetstream,
        &args.stream_name,
        subjects::IMAGE_GEN,
        &consumer_name,
        cancel,
        move |job| {
            let deps = deps.clone();
            async move { handle(&deps, job).await }
        },
    )
    .await
}

async fn handle(deps: &Deps, job: ImageGenJob) -> Outcome {
    match process(deps, &job).await {
        Ok(()) => Outcome::Ack,
        Err(StageError::TransientExternal(e)) => {
            tracing::warn!(?e, plan_id = %job.plan_id, "image-gen transient failure");
            Outcome::Retry
        }
        Err(e) => {
            tracing::error!(?e, plan_id = %job.plan_id, "image-gen unrecoverable; marking plan failed");
            if let Err(e) = deps.coordinator.mark_failed(&job.plan_id, e.into_inner().to_string()).await {
                tracing::error!(?e, plan_id = %job.plan_id, "failed to report plan failure");
            }
            Outcome::Ack
        }
    }
}

async fn process(deps: &Deps, job: &ImageGenJob) -> Result<(), StageError> {
    let tenant = TenantKey::new(
        job.organization_id.clone(),
        job.project_id.clone(),
        job.plan_id.clone(),
    );

    let pdf_bytes = deps
        .blob_store
        .get(&job.pdf_path)
        .await
        .map_err(StageError::transient)?
        .to_vec();

    let discovery = deps
        .container
        .generate_images(&job.plan_id, pdf_bytes.clone(), Some(Duration::from_secs(120)))
        .await?;

    deps.coordinator
        .initialize(
            &job.plan_id,
            InitializeRequest {
                project_id: job.project_id.clone(),
                organization_id: job.organization_id.clone(),
                total_sheets: discovery.total_pages,
                timeout_ms: None,
            },
        )
        .await
        .map_err(StageError::transient)?;

    let page_numbers: Vec<u32> = discovery.sheets.iter().map(|s| s.page_number).collect();
    if page_numbers.is_empty() {
        return Ok(());
    }

    let rendered = deps
        .container
        .render_pages(&job.plan_id, pdf_bytes, &page_numbers, Some(Duration::from_secs(120)))
        .await?;

    for page in rendered.pages {
        let Some(sheet) = discovery
            .sheets
            .iter()
            .find(|s| s.page_number == page.page_number)
        else {
            tracing::warn!(page = page.page_number, plan_id = %job.plan_id, "rendered page with no matching sheet; skipping");
            continue;
        };

        let png_bytes = base64::engine::general_purpose::STANDARD
            .decode(&page.png_base64)
            .map_err(StageError::permanent)?;

        let path = sheet_png_path(&tenant, &sheet.sheet_id);
        deps.blob_store
            .put(&path, png_bytes, "image/png")
            .await
            .map_err(StageError::transient)?;

        let event = Event::SheetImageGenerated {
            sheet_id: sheet.sheet_id.clone(),
            project_id: job.project_id.clone(),
            plan_id: job.plan_id.clone(),
            plan_name: job.plan_name.clone(),
            page_number: page.page_number,
            local_image_path: path.clone(),
            width: page.width,
            height: page.height,
            generated_at: now_ms(),
            remote_image_path: None,
        };
        if let Err(e) = deps.emitter.commit(&job.organization_id, event).await {
            tracing::error!(?e, sheet_id = %sheet.sheet_id, "failed to commit sheetImageGenerated event; swallowing");
        }

        deps.coordinator
            .sheet_image_generated(&job.plan_id, &sheet.sheet_id)
            .await
            .map_err(StageError::transient)?;
    }

    Ok(())
}
