//! Database entity definitions.
//!
//! Entities map table rows one-to-one; conversions to and from domain
//! models live next to each entity.

mod audit_log;
mod flag;
mod protection;

pub use audit_log::AuditLogEntity;
pub use flag::{FlagEntity, FlagHistoryEntity, FlagOverrideEntity};
pub use protection::{
    outcome_as_str, policy_as_str, DomainPolicyEntity, RegistrationAttemptEntity,
};
