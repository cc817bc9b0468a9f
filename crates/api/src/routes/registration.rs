//! Registration protection endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use domain::models::{
    MetricsRange, ProtectionMetrics, ProtectionThresholds, RegistrationDecision, ThresholdUpdate,
};
use domain::stores::DomainPolicy;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{Actor, RequestMeta};

// --- request/response bodies ---

#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Explicit client IP; normally taken from the proxy headers.
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub decision: RegistrationDecision,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuccessRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProtectionRequest {
    #[serde(flatten)]
    pub update: ThresholdUpdate,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockIpRequest {
    pub ip: IpAddr,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BlockIpResponse {
    pub ip: IpAddr,
    pub blocked_until: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DomainPolicyRequest {
    pub domain: String,
    pub policy: String,
    pub reason: String,
}

fn resolve_ip(explicit: Option<IpAddr>, meta: &RequestMeta) -> Result<IpAddr, ApiError> {
    explicit.or(meta.ip).ok_or_else(|| {
        ApiError::Validation("Client IP could not be determined from the request".into())
    })
}

// --- handlers ---

/// POST /api/v1/registration/check
///
/// Called by the registration flow before any account creation work.
/// Never fails open on store errors; a broken counter store reads as
/// `blocked`.
pub async fn check(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let ip = resolve_ip(body.ip, &meta)?;
    let decision = state
        .protection
        .check_attempt(ip, body.email.as_deref(), meta.user_agent.as_deref())
        .await;
    Ok(Json(CheckResponse { decision }))
}

/// POST /api/v1/registration/success
///
/// Reported by the registration flow once account creation completes,
/// so solve-rate metrics can be computed.
pub async fn record_success(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<SuccessRequest>,
) -> Result<StatusCode, ApiError> {
    let ip = resolve_ip(body.ip, &meta)?;
    state.protection.record_success(ip, body.email.as_deref()).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/registration/protection
pub async fn get_protection(State(state): State<AppState>) -> Json<ProtectionThresholds> {
    Json(state.admin.thresholds())
}

/// PATCH /api/v1/registration/protection
pub async fn update_protection(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<UpdateProtectionRequest>,
) -> Result<Json<ProtectionThresholds>, ApiError> {
    let thresholds = state
        .admin
        .update_thresholds(body.update, &body.reason, actor.as_str())
        .await?;
    Ok(Json(thresholds))
}

/// GET /api/v1/registration/metrics?range=24h
pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<ProtectionMetrics>, ApiError> {
    let range = match query.range.as_deref() {
        None => MetricsRange::Last24Hours,
        Some(raw) => MetricsRange::parse(raw).ok_or_else(|| {
            ApiError::Validation(format!(
                "Unknown range '{}'; expected one of 1h, 24h, 7d, 30d",
                raw
            ))
        })?,
    };
    let metrics = state.admin.metrics(range).await?;
    Ok(Json(metrics))
}

/// POST /api/v1/registration/toggle
pub async fn toggle(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<ProtectionThresholds>, ApiError> {
    let thresholds = state
        .admin
        .toggle_self_registration(body.enabled, &body.reason, actor.as_str())
        .await?;
    Ok(Json(thresholds))
}

/// POST /api/v1/registration/blocks
pub async fn block_ip(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<BlockIpRequest>,
) -> Result<(StatusCode, Json<BlockIpResponse>), ApiError> {
    let blocked_until = state
        .admin
        .block_ip(body.ip, &body.reason, actor.as_str())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BlockIpResponse {
            ip: body.ip,
            blocked_until,
        }),
    ))
}

/// DELETE /api/v1/registration/blocks/:ip
pub async fn unblock_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    actor: Actor,
    Json(body): Json<ReasonBody>,
) -> Result<StatusCode, ApiError> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::Validation(format!("'{}' is not a valid IP address", ip)))?;
    state
        .admin
        .unblock_ip(ip, &body.reason, actor.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/registration/domain-policies
pub async fn set_domain_policy(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<DomainPolicyRequest>,
) -> Result<StatusCode, ApiError> {
    let policy = match body.policy.as_str() {
        "allow" => DomainPolicy::Allow,
        "deny" => DomainPolicy::Deny,
        other => {
            return Err(ApiError::Validation(format!(
                "Unknown policy '{}'; expected 'allow' or 'deny'",
                other
            )))
        }
    };
    state
        .admin
        .set_domain_policy(&body.domain, policy, &body.reason, actor.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
