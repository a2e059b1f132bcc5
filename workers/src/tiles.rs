//! Tiles worker (§4.2): asks the container to render a sheet's PMTiles
//! pyramid and writes the resulting archive to blob storage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_nats::jetstream;
use sheetforge_common::blobstore::BlobStoreClient;
use sheetforge_core::container::ContainerClient;
use sheetforge_core::errors::StageError;
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::{TilesJob, subjects};
use sheetforge_core::paths::{sheet_png_path, sheet_tiles_path};
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

    let consumer_name = args.consumer_name.clone().unwrap_or_else(|| "tiles".to_string());
    consumer::run::<TilesJob, _, _>(
        jetstream,
        &args.stream_name,
        subjects::TILES,
        &consumer_name,
        cancel,
        move |job| {
            let deps = deps.clone();
            async move { handle(&deps, job).await }
        },
    )
    .await
}

async fn handle(deps: &Deps, job: TilesJob) -> Outcome {
    match process(deps, &job).await {
        Ok(()) => Outcome::Ack,
        Err(StageError::TransientExternal(e)) => {
            tracing::warn!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "tiles transient failure");
            Outcome::Retry
        }
        Err(e) => {
            tracing::warn!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "tiles permanent failure; reporting sheet slot done");
            if let Err(e) = deps.coordinator.sheet_tiles_generated(&job.plan_id, &job.sheet_id).await {
                tracing::error!(?e, plan_id = %job.plan_id, sheet_id = %job.sheet_id, "failed to report sheet slot");
            }
            Outcome::Ack
        }
    }
}

async fn process(deps: &Deps, job: &TilesJob) -> Result<(), StageError> {
    let tenant = TenantKey::new(
        job.organization_id.clone(),
        job.project_id.clone(),
        job.plan_id.clone(),
    );
    let source_path = sheet_png_path(&tenant, &job.sheet_id);

    let png_bytes = deps
        .blob_store
        .get(&source_path)
        .await
        .map_err(StageError::transient)?
        .to_vec();

    let pmtiles_bytes = deps
        .container
        .generate_tiles(
            &job.organization_id,
            &job.project_id,
            &job.plan_id,
            &job.sheet_id,
            png_bytes,
            Some(Duration::from_secs(120)),
        )
        .await?;

    let (min_zoom, max_zoom) = read_zoom_range(&pmtiles_bytes).unwrap_or((0, 0));

    let tiles_path = sheet_tiles_path(&tenant, &job.sheet_id);
    deps.blob_store
        .put(&tiles_path, pmtiles_bytes.to_vec(), "application/octet-stream")
        .await
        .map_err(StageError::transient)?;

    let event = Event::SheetTilesGenerated {
        sheet_id: job.sheet_id.clone(),
        plan_id: job.plan_id.clone(),
        local_pmtiles_path: tiles_path,
        min_zoom,
        max_zoom,
        generated_at: now_ms(),
        remote_pmtiles_path: None,
    };
    if let Err(e) = deps.emitter.commit(&job.organization_id, event).await {
        tracing::error!(?e, sheet_id = %job.sheet_id, "failed to commit sheetTilesGenerated event; swallowing");
    }

    deps.coordinator
        .sheet_tiles_generated(&job.plan_id, &job.sheet_id)
        .await
        .map_err(StageError::transient)?;

    Ok(())
}

/// Reads `min_zoom`/`max_zoom` straight out of the fixed-offset PMTiles v3
/// header (bytes 100/101, per the public spec) rather than via any rendering
/// logic — the archive's *contents* stay opaque to this core (§1 Non-goals).
fn read_zoom_range(bytes: &[u8]) -> Option<(u32, u32)> {
    const MAGIC: &[u8] = b"PMTiles";
    if bytes.len() < 102 || &bytes[0..7] != MAGIC {
        return None;
    }
    Some((bytes[100] as u32, bytes[101] as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_zoom_range_from_header() {
        let mut header = vec![0u8; 127];
        header[0..7].copy_from_slice(b"PMTiles");
        header[7] = 3;
        header[100] = 2;
        header[101] = 14;
        assert_eq!(read_zoom_range(&header), Some((2, 14)));
    }

    #[test]
    fn rejects_non_pmtiles_bytes() {
        assert_eq!(read_zoom_range(b"not a pmtiles archive"), None);
    }
}
