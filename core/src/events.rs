use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, message::PublishMessage};
use serde::Serialize;

/// Tagged-variant event type: each case carries exactly the fields from the
/// event log contract. Replaces the source's untyped `data` map so that
/// required/extra fields are enforced by the type system, not by convention.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", content = "data")]
pub enum Event {
    #[serde(rename = "planProcessingStarted", rename_all = "camelCase")]
    PlanProcessingStarted { plan_id: String, started_at: i64 },

    #[serde(rename = "planProcessingProgress", rename_all = "camelCase")]
    PlanProcessingProgress { plan_id: String, progress: u32 },

    #[serde(rename = "sheetImageGenerated", rename_all = "camelCase")]
    SheetImageGenerated {
        sheet_id: String,
        project_id: String,
        plan_id: String,
        plan_name: String,
        page_number: u32,
        local_image_path: String,
        width: u32,
        height: u32,
        generated_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_image_path: Option<String>,
    },

    #[serde(rename = "sheetMetadataExtracted", rename_all = "camelCase")]
    SheetMetadataExtracted {
        sheet_id: String,
        plan_id: String,
        sheet_number: String,
        extracted_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sheet_title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        discipline: Option<String>,
    },

    #[serde(rename = "planMetadataCompleted", rename_all = "camelCase")]
    PlanMetadataCompleted {
        plan_id: String,
        valid_sheets: Vec<String>,
        sheet_number_map: BTreeMap<String, String>,
        completed_at: i64,
    },

    #[serde(rename = "sheetCalloutsDetected", rename_all = "camelCase")]
    SheetCalloutsDetected {
        sheet_id: String,
        plan_id: String,
        markers: serde_json::Value,
        unmatched_count: u32,
        detected_at: i64,
    },

    #[serde(rename = "sheetGridBubblesDetected", rename_all = "camelCase")]
    SheetGridBubblesDetected {
        sheet_id: String,
        bubbles: serde_json::Value,
        detected_at: i64,
    },

    #[serde(rename = "sheetLayoutRegionsDetected", rename_all = "camelCase")]
    SheetLayoutRegionsDetected {
        sheet_id: String,
        regions: serde_json::Value,
        detected_at: i64,
    },

    #[serde(rename = "sheetTilesGenerated", rename_all = "camelCase")]
    SheetTilesGenerated {
        sheet_id: String,
        plan_id: String,
        local_pmtiles_path: String,
        min_zoom: u32,
        max_zoom: u32,
        generated_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_pmtiles_path: Option<String>,
    },

    #[serde(rename = "planProcessingCompleted", rename_all = "camelCase")]
    PlanProcessingCompleted {
        plan_id: String,
        sheet_count: u32,
        completed_at: i64,
    },

    #[serde(rename = "planProcessingFailed", rename_all = "camelCase")]
    PlanProcessingFailed {
        plan_id: String,
        error: String,
        failed_at: i64,
    },
}

impl Event {
    /// A stable identifier used for publish-time deduplication, so that a
    /// duplicate report (e.g. `sheetImageGenerated` delivered twice) yields at
    /// most one committed event.
    pub fn dedup_key(&self) -> String {
        match self {
            Event::PlanProcessingStarted { plan_id, .. } => {
                format!("planProcessingStarted:{plan_id}")
            }
            Event::PlanProcessingProgress { plan_id, progress } => {
                format!("planProcessingProgress:{plan_id}:{progress}")
            }
            Event::SheetImageGenerated { plan_id, sheet_id, .. } => {
                format!("sheetImageGenerated:{plan_id}:{sheet_id}")
            }
            Event::SheetMetadataExtracted { plan_id, sheet_id, .. } => {
                format!("sheetMetadataExtracted:{plan_id}:{sheet_id}")
            }
            Event::PlanMetadataCompleted { plan_id, .. } => {
                format!("planMetadataCompleted:{plan_id}")
            }
            Event::SheetCalloutsDetected { plan_id, sheet_id, .. } => {
                format!("sheetCalloutsDetected:{plan_id}:{sheet_id}")
            }
            Event::SheetGridBubblesDetected { sheet_id, .. } => {
                format!("sheetGridBubblesDetected:{sheet_id}")
            }
            Event::SheetLayoutRegionsDetected { sheet_id, .. } => {
                format!("sheetLayoutRegionsDetected:{sheet_id}")
            }
            Event::SheetTilesGenerated { plan_id, sheet_id, .. } => {
                format!("sheetTilesGenerated:{plan_id}:{sheet_id}")
            }
            Event::PlanProcessingCompleted { plan_id, .. } => {
                format!("planProcessingCompleted:{plan_id}")
            }
            Event::PlanProcessingFailed { plan_id, .. } => {
                format!("planProcessingFailed:{plan_id}")
            }
        }
    }
}

/// Commits typed events to the per-tenant append-only event log.
pub trait EventEmitter: Send + Sync {
    fn commit(
        &self,
        organization_id: &str,
        event: Event,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// NATS JetStream-backed emitter. One stream per organization id, with the
/// event's dedup key set as the JetStream message-id so that a duplicate
/// commit attempt is silently absorbed instead of appended twice.
#[derive(Clone)]
pub struct JetStreamEventEmitter {
    jetstream: jetstream::Context,
    stream_prefix: String,
}

impl JetStreamEventEmitter {
    pub fn new(jetstream: jetstream::Context, stream_prefix: impl Into<String>) -> Self {
        Self {
            jetstream,
            stream_prefix: stream_prefix.into(),
        }
    }

    fn stream_name(&self, organization_id: &str) -> String {
        format!("{}_{}", self.stream_prefix, sanitize(organization_id))
    }

    fn subject(&self, organization_id: &str) -> String {
        format!("sheetforge.events.{}", sanitize(organization_id))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl EventEmitter for JetStreamEventEmitter {
    async fn commit(&self, organization_id: &str, event: Event) -> Result<()> {
        let subject = self.subject(organization_id);
        let stream_name = self.stream_name(organization_id);

        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name,
                subjects: vec![subject.clone()],
                ..Default::default()
            })
            .await
            .context("failed to get or create event stream")?;

        let msg_id = event.dedup_key();
        let payload = serde_json::to_vec(&event).context("failed to serialize event")?;

        let publish = PublishMessage::build()
            .payload(bytes::Bytes::from(payload))
            .message_id(msg_id);

        let ack = self
            .jetstream
            .send_publish(subject, publish)
            .await
            .context("failed to publish event")?;
        ack.await.context("failed to get publish ack")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_event(sheet_id: &str, plan_id: &str) -> Event {
        Event::SheetImageGenerated {
            sheet_id: sheet_id.into(),
            project_id: "P".into(),
            plan_id: plan_id.into(),
            plan_name: "plan".into(),
            page_number: 1,
            local_image_path: "/tmp/x.png".into(),
            width: 100,
            height: 200,
            generated_at: 0,
            remote_image_path: None,
        }
    }

    #[test]
    fn dedup_key_is_stable_per_sheet_and_distinguishes_plans() {
        let a = image_event("sheet-0", "L");
        let b = image_event("sheet-0", "L2");
        assert_ne!(a.dedup_key(), b.dedup_key());

        let c = image_event("sheet-0", "L");
        assert_eq!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn serializes_to_tagged_shape_with_camel_case_fields() {
        let event = Event::PlanProcessingCompleted {
            plan_id: "L".into(),
            sheet_count: 3,
            completed_at: 42,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["name"], "planProcessingCompleted");
        assert_eq!(value["data"]["planId"], "L");
        assert_eq!(value["data"]["sheetCount"], 3);
        assert!(value["data"].get("plan_id").is_none());
    }
}
