//! Domain services.
//!
//! - [`bucketer`]: deterministic percentage-rollout bucketing
//! - [`rules`]: targeting rule evaluation
//! - [`cache`]: in-memory read-through flag cache
//! - [`engine`]: the flag evaluation engine and flag mutations
//! - [`emergency`]: emergency disable with per-actor invocation limits
//! - [`protection`]: registration DDoS protection and its admin surface
//! - [`audit`]: audit record builder

pub mod audit;
pub mod bucketer;
pub mod cache;
pub mod emergency;
pub mod engine;
pub mod protection;
pub mod rules;

pub use audit::AuditRecordBuilder;
pub use cache::{CachedFlag, FlagCache};
pub use emergency::EmergencyControl;
pub use engine::{FlagEvaluationEngine, FlagStats};
pub use protection::{ProtectionAdmin, RegistrationProtection};
