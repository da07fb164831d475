use super::ApiState;
use crate::error::CaseStoreError;
use crate::models::CaseStatus;
use crate::store::AiUpdatePayload;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct DashboardStats {
    pub counts: HashMap<String, i64>,
    pub tps: f64,
}

pub async fn dashboard_stats(
    State(state): State<ApiState>,
) -> Result<Json<DashboardStats>, ApiError> {
    let stats = state.case_store.stats()?;
    let counts = stats
        .into_iter()
        .map(|(status, count)| (status_to_wire(status).to_string(), count))
        .collect();
    let tps = *state.last_tps.lock();
    Ok(Json(DashboardStats { counts, tps }))
}

/// §6: cases in `UNDER_INVESTIGATION ∪ ESCALATED`, newest first.
pub async fn dashboard_queue(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let cases = state
        .case_store
        .list_by_status_desc_created(&[CaseStatus::UnderInvestigation, CaseStatus::Escalated])?;
    Ok(Json(json!(cases)))
}

pub async fn get_dashboard_case(
    State(state): State<ApiState>,
    Path(case_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_case_impl(state, case_id).await
}

pub async fn get_case(
    State(state): State<ApiState>,
    Path(case_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_case_impl(state, case_id).await
}

async fn get_case_impl(state: ApiState, case_id: String) -> Result<Json<Value>, ApiError> {
    let case = state
        .case_store
        .get_by_case_id(&case_id)?
        .ok_or_else(|| CaseStoreError::CaseNotFound(case_id))?;
    Ok(Json(json!(case)))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub decision: String,
    pub notes: Option<String>,
}

pub async fn resolve_case(
    State(state): State<ApiState>,
    Path(case_id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Value>, ApiError> {
    let case = state
        .case_store
        .resolve(&case_id, body.decision, body.notes)?;
    state.push_bus.publish_case(&case);
    Ok(Json(json!(case)))
}

#[derive(Deserialize)]
pub struct AiUpdateRequest {
    pub case_id: String,
    #[serde(flatten)]
    pub payload: AiUpdatePayload,
}

pub async fn ai_update(
    State(state): State<ApiState>,
    Json(body): Json<AiUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let case = state
        .case_store
        .apply_ai_update(&body.case_id, body.payload)?;
    state.push_bus.publish_case(&case);
    Ok(Json(json!(case)))
}

fn status_to_wire(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::AutoApproved => "AUTO_APPROVED",
        CaseStatus::AutoBlocked => "AUTO_BLOCKED",
        CaseStatus::UnderInvestigation => "UNDER_INVESTIGATION",
        CaseStatus::Escalated => "ESCALATED",
        CaseStatus::Resolved => "RESOLVED",
    }
}

/// Maps `CaseStoreError` onto the status codes in §7.
pub struct ApiError(CaseStoreError);

impl From<CaseStoreError> for ApiError {
    fn from(e: CaseStoreError) -> Self {
        ApiError(e)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            CaseStoreError::CaseNotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            CaseStoreError::IllegalTransition { .. } => {
                warn!(error = %self.0, "illegal transition rejected at HTTP boundary");
                (StatusCode::CONFLICT, self.0.to_string())
            }
            CaseStoreError::BadPayload(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            CaseStoreError::DuplicateTrigger(_) => (StatusCode::OK, self.0.to_string()),
            CaseStoreError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
