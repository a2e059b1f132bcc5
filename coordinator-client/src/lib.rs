//! Typed client for the coordinator's RPC surface (§6), shared by the stage
//! workers, the orchestrator, and tests, so none of them hand-roll HTTP calls
//! against `/plans/{planId}/...` themselves.

use anyhow::{Context, Result};
use serde::Serialize;
use sheetforge_core::state::{CoordinatorState, Progress};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub project_id: String,
    pub organization_id: String,
    pub total_sheets: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetMetadataExtracted {
    pub sheet_id: String,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_number: Option<String>,
}

/// Client for the coordinator's per-plan RPC surface. Cheap to clone: holds
/// only a `reqwest::Client` and the coordinator's base URL.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_sheet_id(&self, plan_id: &str, rpc: &str, sheet_id: &str) -> Result<Progress> {
        #[derive(Serialize)]
        struct Body<'a> {
            sheet_id: &'a str,
        }
        let response = self
            .client
            .post(format!("{}/plans/{plan_id}/{rpc}", self.base_url))
            .json(&Body { sheet_id })
            .send()
            .await
            .with_context(|| format!("failed to send {rpc} request"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{rpc} failed: {status} - {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse {rpc} response"))
    }

    /// `initialize(planId, ...)`. Idempotent: a repeat call with the same
    /// `totalSheets` returns the existing state instead of erroring.
    pub async fn initialize(
        &self,
        plan_id: &str,
        req: InitializeRequest,
    ) -> Result<CoordinatorState> {
        let response = self
            .client
            .post(format!("{}/plans/{plan_id}/initialize", self.base_url))
            .json(&req)
            .send()
            .await
            .context("failed to send initialize request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("initialize failed: {status} - {body}");
        }

        response
            .json()
            .await
            .context("failed to parse initialize response")
    }

    pub async fn get_state(&self, plan_id: &str) -> Result<Option<CoordinatorState>> {
        let response = self
            .client
            .get(format!("{}/plans/{plan_id}/state", self.base_url))
            .send()
            .await
            .context("failed to send getState request")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("getState failed: {status} - {body}");
        }

        Ok(Some(
            response
                .json()
                .await
                .context("failed to parse getState response")?,
        ))
    }

    pub async fn get_progress(&self, plan_id: &str) -> Result<Progress> {
        let response = self
            .client
            .get(format!("{}/plans/{plan_id}/progress", self.base_url))
            .send()
            .await
            .context("failed to send getProgress request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("getProgress failed: {status} - {body}");
        }

        response
            .json()
            .await
            .context("failed to parse getProgress response")
    }

    pub async fn sheet_image_generated(&self, plan_id: &str, sheet_id: &str) -> Result<Progress> {
        self.post_sheet_id(plan_id, "sheetImageGenerated", sheet_id)
            .await
    }

    pub async fn sheet_metadata_extracted(
        &self,
        plan_id: &str,
        req: SheetMetadataExtracted,
    ) -> Result<Progress> {
        let response = self
            .client
            .post(format!(
                "{}/plans/{plan_id}/sheetMetadataExtracted",
                self.base_url
            ))
            .json(&req)
            .send()
            .await
            .context("failed to send sheetMetadataExtracted request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sheetMetadataExtracted failed: {status} - {body}");
        }

        response
            .json()
            .await
            .context("failed to parse sheetMetadataExtracted response")
    }

    pub async fn sheet_callouts_detected(&self, plan_id: &str, sheet_id: &str) -> Result<Progress> {
        self.post_sheet_id(plan_id, "sheetCalloutsDetected", sheet_id)
            .await
    }

    pub async fn sheet_layout_detected(&self, plan_id: &str, sheet_id: &str) -> Result<Progress> {
        self.post_sheet_id(plan_id, "sheetLayoutDetected", sheet_id)
            .await
    }

    pub async fn sheet_tiles_generated(&self, plan_id: &str, sheet_id: &str) -> Result<Progress> {
        self.post_sheet_id(plan_id, "sheetTilesGenerated", sheet_id)
            .await
    }

    pub async fn mark_failed(&self, plan_id: &str, error: impl Into<String>) -> Result<()> {
        #[derive(Serialize)]
        struct Body {
            error: String,
        }
        let response = self
            .client
            .post(format!("{}/plans/{plan_id}/markFailed", self.base_url))
            .json(&Body {
                error: error.into(),
            })
            .send()
            .await
            .context("failed to send markFailed request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("markFailed failed: {status} - {body}");
        }
        Ok(())
    }
}
