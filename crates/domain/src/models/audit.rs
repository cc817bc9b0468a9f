//! Audit log models.
//!
//! Every mutating action on flags or protection settings is recorded
//! with actor, action, target and reason. Compliance requires the
//! reason; anonymous mutations are rejected upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Actions recorded in the audit log (format: resource.operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    FlagCreate,
    FlagUpdate,
    FlagArchive,
    FlagRollback,
    FlagEmergencyDisable,
    OverrideSet,
    OverrideRemove,
    ProtectionThresholdsUpdate,
    RegistrationToggle,
    DomainPolicySet,
    IpBlock,
    IpUnblock,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::FlagCreate => "flag.create",
            AuditAction::FlagUpdate => "flag.update",
            AuditAction::FlagArchive => "flag.archive",
            AuditAction::FlagRollback => "flag.rollback",
            AuditAction::FlagEmergencyDisable => "flag.emergency_disable",
            AuditAction::OverrideSet => "override.set",
            AuditAction::OverrideRemove => "override.remove",
            AuditAction::ProtectionThresholdsUpdate => "protection.thresholds_update",
            AuditAction::RegistrationToggle => "registration.toggle",
            AuditAction::DomainPolicySet => "domain_policy.set",
            AuditAction::IpBlock => "ip.block",
            AuditAction::IpUnblock => "ip.unblock",
        }
    }
}

/// Input for appending one audit record.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAuditRecordInput {
    pub id: Uuid,
    pub actor_id: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CreateAuditRecordInput {
    pub fn new(
        actor_id: impl Into<String>,
        action: AuditAction,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.into(),
            action,
            resource_type: resource_type.into(),
            resource_id: None,
            reason: None,
            details: None,
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(
            AuditAction::FlagEmergencyDisable.as_str(),
            "flag.emergency_disable"
        );
        assert_eq!(AuditAction::OverrideSet.as_str(), "override.set");
        assert_eq!(
            AuditAction::RegistrationToggle.as_str(),
            "registration.toggle"
        );
    }

    #[test]
    fn test_new_record_defaults() {
        let input = CreateAuditRecordInput::new("admin-1", AuditAction::FlagCreate, "flag");
        assert_eq!(input.actor_id, "admin-1");
        assert_eq!(input.resource_type, "flag");
        assert!(input.resource_id.is_none());
        assert!(input.reason.is_none());
    }
}
