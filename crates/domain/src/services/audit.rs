//! Audit record builder.
//!
//! A fluent builder over [`CreateAuditRecordInput`] so services and
//! route handlers read naturally at the call site.

use serde_json::json;
use std::net::IpAddr;

use crate::models::{AuditAction, CreateAuditRecordInput};

/// Builder for audit records. Actor is mandatory up front; mutations in
/// this subsystem are never anonymous.
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    input: CreateAuditRecordInput,
}

impl AuditRecordBuilder {
    pub fn actor(actor_id: impl Into<String>, action: AuditAction) -> Self {
        let resource_type = match action {
            AuditAction::FlagCreate
            | AuditAction::FlagUpdate
            | AuditAction::FlagArchive
            | AuditAction::FlagRollback
            | AuditAction::FlagEmergencyDisable => "flag",
            AuditAction::OverrideSet | AuditAction::OverrideRemove => "override",
            AuditAction::ProtectionThresholdsUpdate | AuditAction::RegistrationToggle => {
                "protection"
            }
            AuditAction::DomainPolicySet => "domain_policy",
            AuditAction::IpBlock | AuditAction::IpUnblock => "ip",
        };
        Self {
            input: CreateAuditRecordInput::new(actor_id, action, resource_type),
        }
    }

    pub fn on_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.input.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.input.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.input.details = Some(details);
        self
    }

    /// Records a single before/after field change in the details.
    pub fn with_change(
        mut self,
        field: &str,
        old: serde_json::Value,
        new: serde_json::Value,
    ) -> Self {
        let details = self.input.details.get_or_insert_with(|| json!({}));
        if !details.is_object() {
            *details = json!({});
        }
        if let Some(obj) = details.as_object_mut() {
            obj.insert(field.to_string(), json!({ "old": old, "new": new }));
        }
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.input.ip_address = Some(ip);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.input.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> CreateAuditRecordInput {
        self.input
    }
}
