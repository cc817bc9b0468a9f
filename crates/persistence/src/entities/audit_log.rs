//! Audit log entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for audit log records. Append-only.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogEntity {
    pub id: Uuid,

    /// ID of the actor who performed the action.
    pub actor_id: String,

    /// Action performed (format: resource.operation).
    pub action: String,

    /// Type of resource affected.
    pub resource_type: String,

    /// ID of the resource affected.
    pub resource_id: Option<String>,

    /// Human-readable reason supplied with the mutation.
    pub reason: Option<String>,

    /// Additional structured detail (before/after values etc.).
    pub details: Option<serde_json::Value>,

    pub ip_address: Option<String>,

    pub user_agent: Option<String>,

    /// Timestamp when the action occurred.
    pub timestamp: DateTime<Utc>,
}
