use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use sheetforge_common::response::{bad_request, conflict, internal_server_error, not_found};
use sheetforge_core::events::{Event, EventEmitter};
use sheetforge_core::state::{CoordinatorState, Effects};
use sheetforge_core::tenancy::TenantKey;

use crate::db;
use crate::plan::{arm_plan_alarm, mutate_plan, now_ms};
use crate::server::AppState;

pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub project_id: String,
    pub organization_id: String,
    pub total_sheets: u32,
    pub timeout_ms: Option<i64>,
}

/// `initialize(planId, ...)`: idempotent create-or-return. A freshly created
/// zero-sheet plan reaches `complete` inside `CoordinatorState::new` itself,
/// bypassing the normal `Effects` flow, so this handler emits its two
/// aggregate events directly instead of through `mutate_plan`/`apply_effects`.
pub async fn initialize(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<InitializeRequest>,
) -> Response {
    let guard = state.registry.lock(&plan_id).await;

    let existing = match db::load(&state.pool, &plan_id).await {
        Ok(existing) => existing,
        Err(e) => return internal_server_error(e),
    };
    let created_fresh = existing.is_none();
    let timeout_ms = req.timeout_ms.unwrap_or(state.default_timeout_ms);
    let tenant = TenantKey::new(req.organization_id, req.project_id, plan_id.clone());

    let plan = match db::load_or_create(
        &state.pool,
        &plan_id,
        || CoordinatorState::new(tenant, req.total_sheets, timeout_ms, now_ms()),
        now_ms(),
    )
    .await
    {
        Ok(plan) => plan,
        Err(e) => return internal_server_error(e),
    };

    if let Err(e) = plan.check_reinitialize(req.total_sheets) {
        return conflict(e);
    }
    drop(guard);

    if created_fresh && req.total_sheets == 0 {
        let now = now_ms();
        emit(&state, &plan.tenant.organization_id, &plan_id, Event::PlanMetadataCompleted {
            plan_id: plan_id.clone(),
            valid_sheets: Vec::new(),
            sheet_number_map: Default::default(),
            completed_at: now,
        })
        .await;
        emit(&state, &plan.tenant.organization_id, &plan_id, Event::PlanProcessingCompleted {
            plan_id: plan_id.clone(),
            sheet_count: 0,
            completed_at: now,
        })
        .await;
    } else if created_fresh {
        arm_plan_alarm(state.clone(), plan_id, timeout_ms).await;
    }

    Json(plan).into_response()
}

async fn emit(state: &AppState, organization_id: &str, plan_id: &str, event: Event) {
    if let Err(e) = state.emitter.commit(organization_id, event).await {
        tracing::error!(?e, plan_id, "failed to commit event; swallowing");
    }
}

pub async fn get_state(State(state): State<AppState>, Path(plan_id): Path<String>) -> Response {
    match db::load(&state.pool, &plan_id).await {
        Ok(Some(plan)) => Json(plan).into_response(),
        Ok(None) => not_found(anyhow::anyhow!("plan {plan_id} not found")),
        Err(e) => internal_server_error(e),
    }
}

pub async fn get_progress(State(state): State<AppState>, Path(plan_id): Path<String>) -> Response {
    match db::load(&state.pool, &plan_id).await {
        Ok(Some(plan)) => Json(plan.progress()).into_response(),
        Ok(None) => not_found(anyhow::anyhow!("plan {plan_id} not found")),
        Err(e) => internal_server_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SheetIdRequest {
    pub sheet_id: String,
}

pub async fn sheet_image_generated(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<SheetIdRequest>,
) -> Response {
    match mutate_plan(&state, &plan_id, |plan| {
        plan.report_image_generated(&req.sheet_id)
    })
    .await
    {
        Ok((plan, _)) => Json(plan.progress()).into_response(),
        Err(e) => internal_server_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SheetMetadataExtractedRequest {
    pub sheet_id: String,
    pub is_valid: bool,
    pub sheet_number: Option<String>,
}

pub async fn sheet_metadata_extracted(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<SheetMetadataExtractedRequest>,
) -> Response {
    match mutate_plan(&state, &plan_id, |plan| {
        plan.report_metadata_extracted(&req.sheet_id, req.is_valid, req.sheet_number)
    })
    .await
    {
        Ok((plan, _)) => Json(plan.progress()).into_response(),
        Err(e) => internal_server_error(e),
    }
}

pub async fn sheet_callouts_detected(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<SheetIdRequest>,
) -> Response {
    match mutate_plan(&state, &plan_id, |plan| {
        plan.report_callouts_detected(&req.sheet_id)
    })
    .await
    {
        Ok((plan, _)) => Json(plan.progress()).into_response(),
        Err(e) => internal_server_error(e),
    }
}

pub async fn sheet_layout_detected(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<SheetIdRequest>,
) -> Response {
    match mutate_plan(&state, &plan_id, |plan| {
        plan.report_layout_detected(&req.sheet_id)
    })
    .await
    {
        Ok((plan, _)) => Json(plan.progress()).into_response(),
        Err(e) => internal_server_error(e),
    }
}

pub async fn sheet_tiles_generated(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<SheetIdRequest>,
) -> Response {
    match mutate_plan(&state, &plan_id, |plan| {
        plan.report_tiles_generated(&req.sheet_id)
    })
    .await
    {
        Ok((plan, _)) => Json(plan.progress()).into_response(),
        Err(e) => internal_server_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkFailedRequest {
    pub error: String,
}

pub async fn mark_failed(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<MarkFailedRequest>,
) -> Response {
    if req.error.trim().is_empty() {
        return bad_request(anyhow::anyhow!("error must not be empty"));
    }
    match mutate_plan(&state, &plan_id, |plan| {
        plan.mark_failed(req.error.clone());
        Effects::default()
    })
    .await
    {
        Ok((plan, _)) => Json(plan).into_response(),
        Err(e) => internal_server_error(e),
    }
}
