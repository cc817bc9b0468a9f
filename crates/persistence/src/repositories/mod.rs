//! Repository implementations of the domain store traits.

pub mod audit_log;
pub mod flag;
pub mod protection;

pub use audit_log::AuditLogRepository;
pub use flag::FlagRepository;
pub use protection::ProtectionRepository;

use domain::DomainError;

/// Maps a sqlx error onto the domain taxonomy. Unique violations are
/// caller mistakes (duplicate key), everything else is the store being
/// unavailable or corrupt.
pub(crate) fn map_sqlx(context: &str, err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DomainError::validation(format!("{}: already exists", context))
        }
        _ => DomainError::store(format!("{}: {}", context, err)),
    }
}
