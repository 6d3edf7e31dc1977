//! Axum REST handlers for the marketing API.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::types::{CampaignId, CustomerId, ExecutionId, StepId};
use campaign_core::CampaignError;
use campaign_drip::progress::CustomerProgress;
use campaign_drip::types::{
    Campaign, CampaignExecution, CampaignPatch, CampaignStatus, CampaignStep,
    CustomerCampaignState, ExecutionPatch, ExecutionQuery, NewCampaign, NewExecution, NewStep,
    StepPatch,
};
use campaign_drip::CampaignEngine;
use tracing::{error, info};

use crate::models::*;

/// Shared management state.
#[derive(Clone)]
pub struct ManagementState {
    pub engine: Arc<CampaignEngine>,
}

// ─── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Campaign(#[from] CampaignError),

    /// Body, path or query string could not be decoded.
    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Campaign(err) => match err {
                CampaignError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                CampaignError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                CampaignError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                CampaignError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
                CampaignError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                CampaignError::Consistency(_) => (StatusCode::CONFLICT, "consistency"),
                CampaignError::Config(_)
                | CampaignError::Serialization(_)
                | CampaignError::Internal(_) => {
                    error!(error = %err, "Internal error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

/// `Json` extractor whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

fn view(engine: &CampaignEngine, campaign: Campaign) -> CampaignView {
    let stats = engine.store().stats(campaign.id);
    CampaignView { campaign, stats }
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

pub async fn list_campaigns(
    State(state): State<ManagementState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Json<Vec<CampaignView>>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<CampaignStatus>)
        .transpose()?;
    let campaigns = state
        .engine
        .list_campaigns(status)
        .into_iter()
        .map(|c| view(&state.engine, c))
        .collect();
    Ok(Json(campaigns))
}

pub async fn create_campaign(
    State(state): State<ManagementState>,
    ApiJson(req): ApiJson<NewCampaign>,
) -> ApiResult<(StatusCode, Json<CampaignView>)> {
    let campaign = state.engine.create_campaign(req)?;
    metrics::counter!("management.campaigns.created").increment(1);
    Ok((StatusCode::CREATED, Json(view(&state.engine, campaign))))
}

pub async fn get_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.get_campaign(id)?;
    Ok(Json(view(&state.engine, campaign)))
}

pub async fn update_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
    ApiJson(req): ApiJson<CampaignPatch>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.update_campaign(id, req)?;
    Ok(Json(view(&state.engine, campaign)))
}

pub async fn delete_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<StatusCode> {
    state.engine.delete_campaign(id)?;
    metrics::counter!("management.campaigns.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.start_campaign(id).await?;
    info!(campaign_id = id, status = %campaign.status, "Start requested");
    Ok(Json(view(&state.engine, campaign)))
}

pub async fn stop_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.stop_campaign(id)?;
    Ok(Json(view(&state.engine, campaign)))
}

pub async fn pause_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.pause_campaign(id)?;
    Ok(Json(view(&state.engine, campaign)))
}

pub async fn resume_campaign(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<CampaignView>> {
    let campaign = state.engine.resume_campaign(id)?;
    Ok(Json(view(&state.engine, campaign)))
}

// ─── Steps ─────────────────────────────────────────────────────────────────

pub async fn list_steps(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<Vec<CampaignStep>>> {
    Ok(Json(state.engine.list_steps(id)?))
}

pub async fn create_step(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
    ApiJson(req): ApiJson<NewStep>,
) -> ApiResult<(StatusCode, Json<CampaignStep>)> {
    let step = state.engine.add_step(id, req)?;
    Ok((StatusCode::CREATED, Json(step)))
}

pub async fn create_steps_batch(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
    ApiJson(req): ApiJson<BatchSteps>,
) -> ApiResult<(StatusCode, Json<Vec<CampaignStep>>)> {
    let steps = state.engine.add_steps(id, req.steps)?;
    Ok((StatusCode::CREATED, Json(steps)))
}

pub async fn update_step(
    State(state): State<ManagementState>,
    ApiPath((id, step_id)): ApiPath<(CampaignId, StepId)>,
    ApiJson(req): ApiJson<StepPatch>,
) -> ApiResult<Json<CampaignStep>> {
    Ok(Json(state.engine.update_step(id, step_id, req)?))
}

pub async fn delete_step(
    State(state): State<ManagementState>,
    ApiPath((id, step_id)): ApiPath<(CampaignId, StepId)>,
) -> ApiResult<StatusCode> {
    state.engine.delete_step(id, step_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Executions ────────────────────────────────────────────────────────────

pub async fn list_executions(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
    ApiQuery(query): ApiQuery<ExecutionQuery>,
) -> ApiResult<Json<Vec<CampaignExecution>>> {
    Ok(Json(state.engine.list_executions(id, &query)?))
}

pub async fn create_execution(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
    ApiJson(req): ApiJson<NewExecution>,
) -> ApiResult<(StatusCode, Json<CampaignExecution>)> {
    let execution = state.engine.create_execution(id, req)?;
    Ok((StatusCode::CREATED, Json(execution)))
}

pub async fn update_execution(
    State(state): State<ManagementState>,
    ApiPath((id, execution_id)): ApiPath<(CampaignId, ExecutionId)>,
    ApiJson(req): ApiJson<ExecutionPatch>,
) -> ApiResult<Json<CampaignExecution>> {
    Ok(Json(state.engine.update_execution(id, execution_id, req)?))
}

pub async fn delete_execution(
    State(state): State<ManagementState>,
    ApiPath((id, execution_id)): ApiPath<(CampaignId, ExecutionId)>,
) -> ApiResult<StatusCode> {
    state.engine.delete_execution(id, execution_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Customers ─────────────────────────────────────────────────────────────

pub async fn customer_progress(
    State(state): State<ManagementState>,
    ApiPath(id): ApiPath<CampaignId>,
) -> ApiResult<Json<Vec<CustomerProgress>>> {
    Ok(Json(state.engine.customer_progress(id)?))
}

pub async fn pause_customer(
    State(state): State<ManagementState>,
    ApiPath((id, customer_id)): ApiPath<(CampaignId, CustomerId)>,
) -> ApiResult<Json<CustomerCampaignState>> {
    Ok(Json(state.engine.pause_customer(id, customer_id)?))
}

pub async fn resume_customer(
    State(state): State<ManagementState>,
    ApiPath((id, customer_id)): ApiPath<(CampaignId, CustomerId)>,
) -> ApiResult<Json<CustomerCampaignState>> {
    Ok(Json(state.engine.resume_customer(id, customer_id)?))
}
