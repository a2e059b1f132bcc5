//! Typed client for the stateless compute container (§6): one method per
//! endpoint, wire shapes reproduced exactly. The container itself is an
//! external collaborator; this module only speaks its HTTP contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{StageError, classify_status};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub sheet_id: String,
    pub width: u32,
    pub height: u32,
    pub page_number: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImagesResponse {
    pub sheets: Vec<SheetInfo>,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    pub page_number: u32,
    pub png_base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPagesResponse {
    pub pages: Vec<RenderedPage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractMetadataResponse {
    pub sheet_number: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub discipline: Option<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_sheet_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_sheet_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridBubble {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectCalloutsResponse {
    pub markers: Vec<Marker>,
    pub unmatched_count: u32,
    #[serde(default)]
    pub grid_bubbles: Option<Vec<GridBubble>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutRegion {
    pub class: String,
    /// `[x, y, width, height]`, normalized to `[0,1]`.
    pub bbox: [f64; 4],
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectLayoutResponse {
    pub regions: Vec<LayoutRegion>,
}

#[derive(Clone)]
pub struct ContainerClient {
    client: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

impl ContainerClient {
    pub fn new(base_url: impl Into<String>, default_timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            default_timeout: Duration::from_millis(default_timeout_ms),
        }
    }

    async fn post_binary_for_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: Vec<u8>,
        headers: Vec<(&'static str, String)>,
        content_type: Option<&str>,
        timeout: Duration,
    ) -> Result<T, StageError> {
        let mut req = self
            .client
            .post(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .body(body);
        if let Some(ct) = content_type {
            req = req.header(reqwest::header::CONTENT_TYPE, ct);
        }
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let response = req
            .send()
            .await
            .map_err(|e| StageError::transient(anyhow::anyhow!(e).context(format!("{path}: request failed"))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, path));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| StageError::permanent(anyhow::anyhow!(e).context(format!("{path}: malformed response"))))
    }

    pub async fn generate_images(
        &self,
        plan_id: &str,
        pdf_bytes: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<GenerateImagesResponse, StageError> {
        self.post_binary_for_json(
            "/generate-images",
            pdf_bytes,
            vec![("X-Plan-Id", plan_id.to_string())],
            Some("application/pdf"),
            timeout.unwrap_or(self.default_timeout),
        )
        .await
    }

    pub async fn render_pages(
        &self,
        plan_id: &str,
        pdf_bytes: Vec<u8>,
        page_numbers: &[u32],
        timeout: Option<Duration>,
    ) -> Result<RenderPagesResponse, StageError> {
        let page_numbers_json = serde_json::to_string(page_numbers)
            .map_err(|e| StageError::permanent(anyhow::anyhow!(e)))?;
        self.post_binary_for_json(
            "/render-pages",
            pdf_bytes,
            vec![
                ("X-Plan-Id", plan_id.to_string()),
                ("X-Page-Numbers", page_numbers_json),
            ],
            None,
            timeout.unwrap_or(self.default_timeout),
        )
        .await
    }

    pub async fn extract_metadata(
        &self,
        plan_id: &str,
        sheet_id: &str,
        png_bytes: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<ExtractMetadataResponse, StageError> {
        self.post_binary_for_json(
            "/extract-metadata",
            png_bytes,
            vec![
                ("X-Sheet-Id", sheet_id.to_string()),
                ("X-Plan-Id", plan_id.to_string()),
            ],
            Some("image/png"),
            timeout.unwrap_or(self.default_timeout),
        )
        .await
    }

    pub async fn detect_callouts(
        &self,
        plan_id: &str,
        sheet_id: &str,
        sheet_number: &str,
        valid_sheet_numbers: &[String],
        png_bytes: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<DetectCalloutsResponse, StageError> {
        let valid_json = serde_json::to_string(valid_sheet_numbers)
            .map_err(|e| StageError::permanent(anyhow::anyhow!(e)))?;
        self.post_binary_for_json(
            "/detect-callouts",
            png_bytes,
            vec![
                ("X-Sheet-Id", sheet_id.to_string()),
                ("X-Plan-Id", plan_id.to_string()),
                ("X-Sheet-Number", sheet_number.to_string()),
                ("X-Valid-Sheet-Numbers", valid_json),
            ],
            Some("image/png"),
            timeout.unwrap_or(self.default_timeout),
        )
        .await
    }

    pub async fn detect_layout(
        &self,
        plan_id: &str,
        sheet_id: &str,
        png_bytes: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<DetectLayoutResponse, StageError> {
        self.post_binary_for_json(
            "/detect-layout",
            png_bytes,
            vec![
                ("X-Sheet-Id", sheet_id.to_string()),
                ("X-Plan-Id", plan_id.to_string()),
            ],
            Some("image/png"),
            timeout.unwrap_or(self.default_timeout),
        )
        .await
    }

    pub async fn generate_tiles(
        &self,
        organization_id: &str,
        project_id: &str,
        plan_id: &str,
        sheet_id: &str,
        png_bytes: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<bytes::Bytes, StageError> {
        let response = self
            .client
            .post(format!("{}/generate-tiles", self.base_url))
            .timeout(timeout.unwrap_or(self.default_timeout))
            .header("X-Sheet-Id", sheet_id)
            .header("X-Plan-Id", plan_id)
            .header("X-Organization-Id", organization_id)
            .header("X-Project-Id", project_id)
            .body(png_bytes)
            .send()
            .await
            .map_err(|e| {
                StageError::transient(anyhow::anyhow!(e).context("generate-tiles: request failed"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "/generate-tiles"));
        }
        response
            .bytes()
            .await
            .map_err(|e| StageError::transient(anyhow::anyhow!(e).context("generate-tiles: failed to read body")))
    }
}
