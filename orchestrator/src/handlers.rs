use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sheetforge_common::response::{bad_request, internal_server_error};
use uuid::Uuid;

use crate::server::AppState;
use crate::upload::UploadNotification;

pub async fn health() -> impl IntoResponse {
    "OK"
}

/// The bucket-event path: whatever fronts this service (e.g. an S3 event
/// bridge) POSTs the raw notification here.
pub async fn upload_notification(
    State(state): State<AppState>,
    Json(notification): Json<UploadNotification>,
) -> Response {
    match state.upload_handler.handle(&notification).await {
        Ok(Some(plan_id)) => Json(serde_json::json!({ "planId": plan_id })).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_server_error(e),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    plan_id: String,
}

/// The HTTP multipart entry surface named in §6. Writes the file to the
/// canonical `source.pdf` blob path, then synthesizes the same notification
/// shape the bucket-event path would produce and hands it to the same
/// handler, so both entry points converge on one code path (§4.3.1).
pub async fn uploads(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut project_id: Option<String> = None;
    let mut organization_id: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(anyhow::anyhow!(e)),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_bytes = Some(match field.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => return bad_request(anyhow::anyhow!(e)),
                });
            }
            "projectId" => {
                project_id = match field.text().await {
                    Ok(t) => Some(t),
                    Err(e) => return bad_request(anyhow::anyhow!(e)),
                };
            }
            "organizationId" => {
                organization_id = match field.text().await {
                    Ok(t) => Some(t),
                    Err(e) => return bad_request(anyhow::anyhow!(e)),
                };
            }
            _ => {}
        }
    }

    let (Some(file_bytes), Some(project_id), Some(organization_id)) =
        (file_bytes, project_id, organization_id)
    else {
        return bad_request(anyhow::anyhow!(
            "multipart body must include file, projectId, organizationId"
        ));
    };

    let plan_id = Uuid::new_v4().to_string();
    let tenant = sheetforge_core::tenancy::TenantKey::new(organization_id, project_id, plan_id);
    let object_key = sheetforge_core::paths::source_pdf_path(&tenant);
    let size = file_bytes.len() as u64;

    if let Err(e) = state
        .blob_store
        .put(&object_key, file_bytes, "application/pdf")
        .await
    {
        return internal_server_error(e);
    }

    let notification = UploadNotification {
        bucket: state.bucket.clone(),
        object_key,
        action: "PutObject".to_string(),
        size,
        event_time: chrono::Utc::now().timestamp_millis(),
    };

    match state.upload_handler.handle(&notification).await {
        Ok(Some(plan_id)) => Json(UploadResponse { plan_id }).into_response(),
        Ok(None) => internal_server_error(anyhow::anyhow!(
            "synthesized upload notification was unexpectedly ignored"
        )),
        Err(e) => internal_server_error(e),
    }
}
