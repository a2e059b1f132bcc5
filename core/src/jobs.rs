use serde::{Deserialize, Serialize};

/// NATS subjects carrying each stage's job records.
pub mod subjects {
    pub const IMAGE_GEN: &str = "sheetforge.jobs.image_gen";
    pub const METADATA: &str = "sheetforge.jobs.metadata";
    pub const CALLOUT: &str = "sheetforge.jobs.callout";
    pub const LAYOUT: &str = "sheetforge.jobs.layout";
    pub const TILES: &str = "sheetforge.jobs.tiles";

    pub const STREAM_NAME: &str = "SHEETFORGE_JOBS";
    pub const ALL: [&str; 5] = [IMAGE_GEN, METADATA, CALLOUT, LAYOUT, TILES];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenJob {
    pub plan_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub pdf_path: String,
    /// Provisional; the image-gen worker overwrites its own view once it
    /// learns the true page count from `/generate-images`.
    pub total_pages: u32,
    pub plan_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataJob {
    pub plan_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub sheet_id: String,
    /// 1-based.
    pub sheet_number: u32,
    pub total_sheets: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalloutJob {
    pub plan_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub sheet_id: String,
    pub sheet_number: String,
    pub valid_sheet_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutJob {
    pub plan_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub sheet_id: String,
    pub sheet_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesJob {
    pub plan_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub sheet_id: String,
}
