use anyhow::{Context, Result};
use async_nats::jetstream::{self, message::PublishMessage};
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::subjects;
use sheetforge_core::state::{CoordinatorState, Effects, Status};

use crate::alarm::AlarmRegistry;

#[derive(Clone)]
pub struct JobDispatcher {
    jetstream: jetstream::Context,
    stream_name: String,
}

impl JobDispatcher {
    pub fn new(jetstream: jetstream::Context, stream_name: String) -> Self {
        Self {
            jetstream,
            stream_name,
        }
    }

    pub async fn ensure_stream(&self) -> Result<()> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.stream_name.clone(),
                subjects: subjects::ALL.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .await
            .context("failed to get or create jobs stream")?;
        Ok(())
    }

    async fn publish(&self, subject: &str, msg_id: String, payload: Vec<u8>) -> Result<()> {
        let publish = PublishMessage::build()
            .payload(bytes::Bytes::from(payload))
            .message_id(msg_id);
        let ack = self
            .jetstream
            .send_publish(subject, publish)
            .await
            .context("failed to publish job")?;
        ack.await.context("failed to get publish ack")?;
        Ok(())
    }
}

fn log_commit_err(plan_id: &str, event_name: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::error!(?e, plan_id, event_name, "failed to commit event; swallowing");
    }
}

/// Dispatch the jobs an RPC's effects asked for, and emit the aggregate
/// events a stage boundary implies. Runs after the registry lock for that
/// plan has been released (§4.1.1): duplicate dispatch on crash-and-retry is
/// absorbed by NATS message-id dedup, so ordering relative to the lock only
/// affects latency, not correctness.
///
/// `old_status` is the status observed immediately before the mutation that
/// produced `effects`, used to detect stage-boundary crossings for
/// `planProcessingProgress` and the terminal-state events.
pub async fn apply_effects(
    dispatcher: &JobDispatcher,
    emitter: &JetStreamEventEmitter,
    alarms: &AlarmRegistry,
    plan: &CoordinatorState,
    effects: &Effects,
    old_status: Status,
    now_ms: i64,
) -> Result<()> {
    let organization_id = plan.tenant.organization_id.as_str();
    let plan_id = plan.tenant.plan_id.as_str();

    // §4.1: "emit planMetadataCompleted; transition...; enqueue..." — the
    // aggregate event precedes the next stage's job dispatch.
    if effects.metadata_completed {
        log_commit_err(
            plan_id,
            "planMetadataCompleted",
            emitter
                .commit(
                    organization_id,
                    Event::PlanMetadataCompleted {
                        plan_id: plan_id.to_string(),
                        valid_sheets: plan.valid_sheets_sorted(),
                        sheet_number_map: plan.sheet_number_map.clone(),
                        completed_at: now_ms,
                    },
                )
                .await,
        );
    }

    for job in &effects.metadata_jobs {
        let payload = serde_json::to_vec(job).context("failed to serialize metadata job")?;
        let msg_id = format!("metadata:{}:{}", job.plan_id, job.sheet_id);
        dispatcher
            .publish(subjects::METADATA, msg_id, payload)
            .await?;
    }

    for job in &effects.callout_jobs {
        let payload = serde_json::to_vec(job).context("failed to serialize callout job")?;
        let msg_id = format!("callout:{}:{}", job.plan_id, job.sheet_id);
        dispatcher
            .publish(subjects::CALLOUT, msg_id, payload)
            .await?;
    }

    for job in &effects.layout_jobs {
        let payload = serde_json::to_vec(job).context("failed to serialize layout job")?;
        let msg_id = format!("layout:{}:{}", job.plan_id, job.sheet_id);
        dispatcher
            .publish(subjects::LAYOUT, msg_id, payload)
            .await?;
    }

    for job in &effects.tiles_jobs {
        let payload = serde_json::to_vec(job).context("failed to serialize tiles job")?;
        let msg_id = format!("tiles:{}:{}", job.plan_id, job.sheet_id);
        dispatcher
            .publish(subjects::TILES, msg_id, payload)
            .await?;
    }

    if plan.status != old_status {
        log_commit_err(
            plan_id,
            "planProcessingProgress",
            emitter
                .commit(
                    organization_id,
                    Event::PlanProcessingProgress {
                        plan_id: plan_id.to_string(),
                        progress: plan.progress().percent(plan.status),
                    },
                )
                .await,
        );
    }

    if effects.processing_completed && plan.status == Status::Complete {
        log_commit_err(
            plan_id,
            "planProcessingCompleted",
            emitter
                .commit(
                    organization_id,
                    Event::PlanProcessingCompleted {
                        plan_id: plan_id.to_string(),
                        sheet_count: plan.valid_sheets.len() as u32,
                        completed_at: now_ms,
                    },
                )
                .await,
        );
        alarms.cancel(plan_id).await;
    }

    if plan.status == Status::Failed && old_status != Status::Failed {
        log_commit_err(
            plan_id,
            "planProcessingFailed",
            emitter
                .commit(
                    organization_id,
                    Event::PlanProcessingFailed {
                        plan_id: plan_id.to_string(),
                        error: plan.last_error.clone().unwrap_or_default(),
                        failed_at: now_ms,
                    },
                )
                .await,
        );
        alarms.cancel(plan_id).await;
    }

    Ok(())
}
