//! Feature flag database entities.

use chrono::{DateTime, Utc};
use domain::models::{
    FlagDefinition, FlagHistoryEntry, FlagOverride, FlagType, OverrideTargetType,
};
use domain::DomainError;
use sqlx::FromRow;
use uuid::Uuid;

/// Row of the `flags` table. Typed fields the database cannot express
/// directly (flag type, values, rules) are stored as text/JSONB and
/// parsed on the way out.
#[derive(Debug, Clone, FromRow)]
pub struct FlagEntity {
    pub id: Uuid,
    pub flag_key: String,
    pub name: String,
    pub description: Option<String>,
    pub flag_type: String,
    pub default_value: serde_json::Value,
    pub enabled: bool,
    pub is_system_wide: bool,
    pub category: Option<String>,
    pub rollout_percentage: Option<i16>,
    pub targeting_rules: serde_json::Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub archived: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlagEntity {
    pub fn into_domain(self) -> Result<FlagDefinition, DomainError> {
        let flag_type = parse_flag_type(&self.flag_type)?;
        let default_value = serde_json::from_value(self.default_value)
            .map_err(|e| DomainError::store(format!("corrupt default_value: {}", e)))?;
        let targeting_rules = serde_json::from_value(self.targeting_rules)
            .map_err(|e| DomainError::store(format!("corrupt targeting_rules: {}", e)))?;

        Ok(FlagDefinition {
            id: self.id,
            key: self.flag_key,
            name: self.name,
            description: self.description,
            flag_type,
            default_value,
            enabled: self.enabled,
            is_system_wide: self.is_system_wide,
            category: self.category,
            rollout_percentage: self.rollout_percentage.map(|p| p as u8),
            targeting_rules,
            start_date: self.start_date,
            end_date: self.end_date,
            archived: self.archived,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_flag_type(s: &str) -> Result<FlagType, DomainError> {
    match s {
        "boolean" => Ok(FlagType::Boolean),
        "percentage" => Ok(FlagType::Percentage),
        "variant" => Ok(FlagType::Variant),
        "numeric" => Ok(FlagType::Numeric),
        "string" => Ok(FlagType::String),
        other => Err(DomainError::store(format!("unknown flag type '{}'", other))),
    }
}

/// Row of the `flag_overrides` table.
#[derive(Debug, Clone, FromRow)]
pub struct FlagOverrideEntity {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub target_type: String,
    pub target_id: String,
    pub enabled: bool,
    pub reason: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl FlagOverrideEntity {
    pub fn into_domain(self) -> Result<FlagOverride, DomainError> {
        let target_type = match self.target_type.as_str() {
            "user" => OverrideTargetType::User,
            "group" => OverrideTargetType::Group,
            other => {
                return Err(DomainError::store(format!(
                    "unknown override target type '{}'",
                    other
                )))
            }
        };
        Ok(FlagOverride {
            id: self.id,
            flag_id: self.flag_id,
            target_type,
            target_id: self.target_id,
            enabled: self.enabled,
            reason: self.reason,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

/// Row of the `flag_history` table. The snapshot holds the full
/// definition as JSONB; history is append-only.
#[derive(Debug, Clone, FromRow)]
pub struct FlagHistoryEntity {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub version: i64,
    pub snapshot: serde_json::Value,
    pub change_reason: String,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

impl FlagHistoryEntity {
    pub fn into_domain(self) -> Result<FlagHistoryEntry, DomainError> {
        let snapshot = serde_json::from_value(self.snapshot)
            .map_err(|e| DomainError::store(format!("corrupt history snapshot: {}", e)))?;
        Ok(FlagHistoryEntry {
            id: self.id,
            flag_id: self.flag_id,
            version: self.version,
            snapshot,
            change_reason: self.change_reason,
            changed_by: self.changed_by,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::FlagValue;
    use serde_json::json;

    fn entity() -> FlagEntity {
        let now = Utc::now();
        FlagEntity {
            id: Uuid::new_v4(),
            flag_key: "dark-mode".to_string(),
            name: "Dark mode".to_string(),
            description: None,
            flag_type: "percentage".to_string(),
            default_value: json!(false),
            enabled: true,
            is_system_wide: false,
            category: Some("ui".to_string()),
            rollout_percentage: Some(30),
            targeting_rules: json!([]),
            start_date: None,
            end_date: None,
            archived: false,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_entity_into_domain() {
        let flag = entity().into_domain().unwrap();
        assert_eq!(flag.key, "dark-mode");
        assert_eq!(flag.flag_type, FlagType::Percentage);
        assert_eq!(flag.default_value, FlagValue::Bool(false));
        assert_eq!(flag.rollout_percentage, Some(30));
        assert_eq!(flag.version, 3);
    }

    #[test]
    fn test_unknown_flag_type_is_store_error() {
        let mut bad = entity();
        bad.flag_type = "gradient".to_string();
        assert!(matches!(
            bad.into_domain(),
            Err(DomainError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_override_target_type_parsing() {
        let now = Utc::now();
        let ovr = FlagOverrideEntity {
            id: Uuid::new_v4(),
            flag_id: Uuid::new_v4(),
            target_type: "group".to_string(),
            target_id: "grp-1".to_string(),
            enabled: true,
            reason: "pilot group".to_string(),
            created_by: "admin-1".to_string(),
            created_at: now,
        };
        assert_eq!(
            ovr.into_domain().unwrap().target_type,
            OverrideTargetType::Group
        );
    }
}
