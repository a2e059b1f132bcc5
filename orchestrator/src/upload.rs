//! Upload-notification handling (§4.3): the bucket-event path and the
//! `POST /uploads` multipart path both converge on [`UploadHandler::handle`].

use anyhow::{Context, Result};
use async_nats::jetstream::{self, message::PublishMessage};
use serde::{Deserialize, Serialize};
use sheetforge_core::events::{Event, EventEmitter, JetStreamEventEmitter};
use sheetforge_core::jobs::{ImageGenJob, subjects};
use sheetforge_core::paths::parse_source_pdf_key;
use sheetforge_core::tenancy::TenantKey;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadNotification {
    pub bucket: String,
    pub object_key: String,
    pub action: String,
    pub size: u64,
    pub event_time: i64,
}

const ACCEPTED_ACTIONS: [&str; 2] = ["PutObject", "CompleteMultipartUpload"];

/// Pure decision: does this notification start a plan, and if so with what
/// job record? Kept free of I/O so it's testable without a NATS connection.
fn plan_for_notification(notification: &UploadNotification) -> Option<(TenantKey, ImageGenJob)> {
    if !ACCEPTED_ACTIONS.contains(&notification.action.as_str()) {
        return None;
    }
    let tenant = parse_source_pdf_key(&notification.object_key)?;
    let job = ImageGenJob {
        plan_id: tenant.plan_id.clone(),
        project_id: tenant.project_id.clone(),
        organization_id: tenant.organization_id.clone(),
        pdf_path: notification.object_key.clone(),
        total_pages: 0,
        plan_name: tenant.plan_id.clone(),
    };
    Some((tenant, job))
}

#[derive(Clone)]
pub struct UploadHandler {
    jetstream: jetstream::Context,
    stream_name: String,
    emitter: JetStreamEventEmitter,
}

impl UploadHandler {
    pub fn new(
        jetstream: jetstream::Context,
        stream_name: String,
        emitter: JetStreamEventEmitter,
    ) -> Self {
        Self {
            jetstream,
            stream_name,
            emitter,
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

    /// Returns the enqueued plan id, or `None` if the notification was
    /// ignored (wrong action, or `objectKey` doesn't match the source.pdf
    /// shape).
    pub async fn handle(&self, notification: &UploadNotification) -> Result<Option<String>> {
        let Some((tenant, job)) = plan_for_notification(notification) else {
            tracing::debug!(
                action = %notification.action,
                key = %notification.object_key,
                "ignoring upload notification"
            );
            return Ok(None);
        };

        if let Err(e) = self
            .emitter
            .commit(
                &tenant.organization_id,
                Event::PlanProcessingStarted {
                    plan_id: tenant.plan_id.clone(),
                    started_at: notification.event_time,
                },
            )
            .await
        {
            tracing::error!(?e, plan_id = %tenant.plan_id, "failed to commit planProcessingStarted event; swallowing");
        }

        let payload = serde_json::to_vec(&job).context("failed to serialize image-gen job")?;
        let msg_id = format!("image_gen:{}", job.plan_id);
        let publish = PublishMessage::build()
            .payload(bytes::Bytes::from(payload))
            .message_id(msg_id);
        let ack = self
            .jetstream
            .send_publish(subjects::IMAGE_GEN, publish)
            .await
            .context("failed to publish image-gen job")?;
        ack.await.context("failed to get publish ack")?;

        Ok(Some(job.plan_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(action: &str, key: &str) -> UploadNotification {
        UploadNotification {
            bucket: "plans".into(),
            object_key: key.into(),
            action: action.into(),
            size: 1024,
            event_time: 0,
        }
    }

    #[test]
    fn ignores_non_write_actions() {
        let n = notification(
            "DeleteObject",
            "organizations/O/projects/P/plans/L/source.pdf",
        );
        assert!(plan_for_notification(&n).is_none());
    }

    #[test]
    fn ignores_non_matching_keys() {
        let n = notification("PutObject", "organizations/O/projects/P/plans/L/image.png");
        assert!(plan_for_notification(&n).is_none());
    }

    #[test]
    fn matches_put_object_on_source_pdf() {
        let n = notification(
            "PutObject",
            "organizations/O/projects/P/plans/L/source.pdf",
        );
        let (tenant, job) = plan_for_notification(&n).unwrap();
        assert_eq!(tenant, TenantKey::new("O", "P", "L"));
        assert_eq!(job.plan_id, "L");
        assert_eq!(job.organization_id, "O");
        assert_eq!(job.project_id, "P");
        assert_eq!(job.total_pages, 0);
    }

    #[test]
    fn matches_complete_multipart_upload() {
        let n = notification(
            "CompleteMultipartUpload",
            "organizations/O/projects/P/plans/L/source.pdf",
        );
        assert!(plan_for_notification(&n).is_some());
    }
}
