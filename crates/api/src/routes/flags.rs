//! Feature flag endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use domain::models::{
    CreateFlagInput, EvaluationContext, EvaluationResult, FlagChanges, FlagDefinition,
    FlagHistoryEntry, FlagOverride, FlagValue, SetOverrideInput,
};
use domain::services::FlagStats;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{Actor, RequestMeta};

/// Hard cap on batch evaluation size; keeps one request from holding a
/// connection for an unbounded amount of work.
const MAX_BATCH_KEYS: usize = 100;

// --- request/response bodies ---

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub context: EvaluationContext,
    /// Value returned with reason `not_found`/`default` when the store
    /// is unavailable or the flag does not exist.
    #[serde(default)]
    pub fallback: Option<FlagValue>,
}

#[derive(Debug, Deserialize)]
pub struct BatchEvaluateRequest {
    pub flag_keys: Vec<String>,
    #[serde(default)]
    pub context: EvaluationContext,
}

#[derive(Debug, Serialize)]
pub struct BatchEvaluateResponse {
    pub results: Vec<EvaluationResult>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListResponse {
    Filtered { flags: Vec<FlagDefinition> },
    Grouped { categories: HashMap<String, Vec<FlagDefinition>> },
}

#[derive(Debug, Deserialize)]
pub struct CreateFlagRequest {
    #[serde(flatten)]
    pub flag: CreateFlagInput,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFlagRequest {
    #[serde(flatten)]
    pub changes: FlagChanges,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub history_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct FlagDetail {
    #[serde(flatten)]
    pub flag: FlagDefinition,
    pub overrides: Vec<FlagOverride>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<FlagHistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: HashMap<String, FlagStats>,
    pub cache_hit_rate: f64,
}

fn fill_request_meta(ctx: &mut EvaluationContext, meta: &RequestMeta) {
    if ctx.ip.is_none() {
        ctx.ip = meta.ip;
    }
    if ctx.user_agent.is_none() {
        ctx.user_agent = meta.user_agent.clone();
    }
}

// --- read path ---

/// POST /api/v1/flags/:key/evaluate
pub async fn evaluate_flag(
    State(state): State<AppState>,
    Path(key): Path<String>,
    meta: RequestMeta,
    Json(body): Json<EvaluateRequest>,
) -> Json<EvaluationResult> {
    let mut ctx = body.context;
    fill_request_meta(&mut ctx, &meta);
    Json(state.engine.evaluate(&key, &ctx, body.fallback).await)
}

/// POST /api/v1/flags/evaluate
pub async fn evaluate_batch(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<BatchEvaluateRequest>,
) -> Result<Json<BatchEvaluateResponse>, ApiError> {
    if body.flag_keys.is_empty() {
        return Err(ApiError::Validation("flag_keys must not be empty".into()));
    }
    if body.flag_keys.len() > MAX_BATCH_KEYS {
        return Err(ApiError::Validation(format!(
            "At most {} flags can be evaluated per request",
            MAX_BATCH_KEYS
        )));
    }

    let mut ctx = body.context;
    fill_request_meta(&mut ctx, &meta);
    let results = state.engine.evaluate_many(&body.flag_keys, &ctx).await;
    Ok(Json(BatchEvaluateResponse { results }))
}

/// GET /api/v1/flags
///
/// Without `?category=` the active flags are returned grouped by
/// category, served from the listing cache. With the filter the store
/// is queried directly and archived flags are included.
pub async fn list_flags(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    match query.category.as_deref() {
        Some(category) => {
            let flags = state.engine.list_flags(Some(category)).await?;
            Ok(Json(ListResponse::Filtered { flags }))
        }
        None => {
            let listing = state.engine.flags_by_category().await?;
            Ok(Json(ListResponse::Grouped {
                categories: (*listing).clone(),
            }))
        }
    }
}

/// GET /api/v1/flags/:key
pub async fn get_flag(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<FlagDetail>, ApiError> {
    let flag = state.engine.get_flag(&key).await?;
    let overrides = state.engine.overrides(&key).await?;
    Ok(Json(FlagDetail { flag, overrides }))
}

/// GET /api/v1/flags/:key/history
pub async fn flag_history(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.engine.history(&key).await?;
    Ok(Json(HistoryResponse { history }))
}

/// GET /api/v1/flags/stats
pub async fn flag_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.engine.stats(),
        cache_hit_rate: state.engine.cache_hit_rate(),
    })
}

// --- write path ---

/// POST /api/v1/flags
pub async fn create_flag(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateFlagRequest>,
) -> Result<(StatusCode, Json<FlagDefinition>), ApiError> {
    let flag = state
        .engine
        .create_flag(body.flag, &body.reason, actor.as_str())
        .await?;
    Ok((StatusCode::CREATED, Json(flag)))
}

/// PATCH /api/v1/flags/:key
pub async fn update_flag(
    State(state): State<AppState>,
    Path(key): Path<String>,
    actor: Actor,
    Json(body): Json<UpdateFlagRequest>,
) -> Result<Json<FlagDefinition>, ApiError> {
    let flag = state
        .engine
        .update_flag(&key, body.changes, &body.reason, actor.as_str())
        .await?;
    Ok(Json(flag))
}

/// POST /api/v1/flags/:key/archive
pub async fn archive_flag(
    State(state): State<AppState>,
    Path(key): Path<String>,
    actor: Actor,
    Json(body): Json<ReasonBody>,
) -> Result<Json<FlagDefinition>, ApiError> {
    let flag = state
        .engine
        .archive_flag(&key, &body.reason, actor.as_str())
        .await?;
    Ok(Json(flag))
}

/// POST /api/v1/flags/:key/overrides
pub async fn set_override(
    State(state): State<AppState>,
    Path(key): Path<String>,
    actor: Actor,
    Json(body): Json<SetOverrideInput>,
) -> Result<(StatusCode, Json<FlagOverride>), ApiError> {
    let ovr = state.engine.set_override(&key, body, actor.as_str()).await?;
    Ok((StatusCode::CREATED, Json(ovr)))
}

/// DELETE /api/v1/flags/:key/overrides/:override_id
pub async fn remove_override(
    State(state): State<AppState>,
    Path((key, override_id)): Path<(String, Uuid)>,
    actor: Actor,
    Json(body): Json<ReasonBody>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .remove_override(&key, override_id, &body.reason, actor.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/flags/:key/emergency-disable
pub async fn emergency_disable(
    State(state): State<AppState>,
    Path(key): Path<String>,
    actor: Actor,
    Json(body): Json<ReasonBody>,
) -> Result<Json<FlagDefinition>, ApiError> {
    let flag = state
        .emergency
        .disable_flag(&key, &body.reason, actor.as_str())
        .await?;
    Ok(Json(flag))
}

/// POST /api/v1/flags/:key/rollback
pub async fn rollback_flag(
    State(state): State<AppState>,
    Path(key): Path<String>,
    actor: Actor,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<FlagDefinition>, ApiError> {
    let flag = state
        .engine
        .rollback_flag(&key, body.history_id, &body.reason, actor.as_str())
        .await?;
    Ok(Json(flag))
}
