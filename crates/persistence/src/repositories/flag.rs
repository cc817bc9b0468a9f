//! Flag repository: the Postgres `FlagStore`.

use async_trait::async_trait;
use domain::models::{FlagDefinition, FlagHistoryEntry, FlagOverride};
use domain::stores::FlagStore;
use domain::DomainError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{FlagEntity, FlagHistoryEntity, FlagOverrideEntity};
use crate::metrics::QueryTimer;
use crate::repositories::map_sqlx;

const FLAG_COLUMNS: &str = "id, flag_key, name, description, flag_type, default_value, enabled, \
     is_system_wide, category, rollout_percentage, targeting_rules, start_date, end_date, \
     archived, version, created_at, updated_at";

#[derive(Clone)]
pub struct FlagRepository {
    pool: PgPool,
}

impl FlagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn bind_flag<'q>(
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, FlagEntity, sqlx::postgres::PgArguments>,
        flag: &'q FlagDefinition,
        rules: serde_json::Value,
        default_value: serde_json::Value,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, FlagEntity, sqlx::postgres::PgArguments> {
        query
            .bind(flag.id)
            .bind(&flag.key)
            .bind(&flag.name)
            .bind(&flag.description)
            .bind(flag.flag_type.as_str())
            .bind(default_value)
            .bind(flag.enabled)
            .bind(flag.is_system_wide)
            .bind(&flag.category)
            .bind(flag.rollout_percentage.map(i16::from))
            .bind(rules)
            .bind(flag.start_date)
            .bind(flag.end_date)
            .bind(flag.archived)
            .bind(flag.version)
            .bind(flag.created_at)
            .bind(flag.updated_at)
    }
}

fn encode_json<T: serde::Serialize>(what: &str, value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value).map_err(|e| DomainError::store(format!("encode {}: {}", what, e)))
}

#[async_trait]
impl FlagStore for FlagRepository {
    async fn get(&self, key: &str) -> Result<Option<FlagDefinition>, DomainError> {
        let timer = QueryTimer::new("get_flag");
        let entity = sqlx::query_as::<_, FlagEntity>(&format!(
            "SELECT {} FROM flags WHERE flag_key = $1",
            FLAG_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get flag", e))?;
        timer.record();
        entity.map(FlagEntity::into_domain).transpose()
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<FlagDefinition>, DomainError> {
        let timer = QueryTimer::new("list_flags");
        let entities = match category {
            Some(category) => {
                sqlx::query_as::<_, FlagEntity>(&format!(
                    "SELECT {} FROM flags WHERE category = $1 ORDER BY flag_key",
                    FLAG_COLUMNS
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, FlagEntity>(&format!(
                    "SELECT {} FROM flags ORDER BY category NULLS LAST, flag_key",
                    FLAG_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx("list flags", e))?;
        timer.record();
        entities.into_iter().map(FlagEntity::into_domain).collect()
    }

    async fn insert(&self, flag: &FlagDefinition) -> Result<(), DomainError> {
        let rules = encode_json("targeting rules", &flag.targeting_rules)?;
        let default_value = encode_json("default value", &flag.default_value)?;
        let timer = QueryTimer::new("insert_flag");
        Self::bind_flag(
            sqlx::query_as::<_, FlagEntity>(&format!(
                "INSERT INTO flags ({}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
                 RETURNING {}",
                FLAG_COLUMNS, FLAG_COLUMNS
            )),
            flag,
            rules,
            default_value,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(&format!("insert flag '{}'", flag.key), e))?;
        timer.record();
        Ok(())
    }

    async fn put(&self, flag: &FlagDefinition) -> Result<(), DomainError> {
        let rules = encode_json("targeting rules", &flag.targeting_rules)?;
        let default_value = encode_json("default value", &flag.default_value)?;
        let timer = QueryTimer::new("put_flag");
        let result = sqlx::query(
            "UPDATE flags SET name = $2, description = $3, default_value = $4, enabled = $5, \
             is_system_wide = $6, category = $7, rollout_percentage = $8, targeting_rules = $9, \
             start_date = $10, end_date = $11, archived = $12, version = $13, updated_at = $14 \
             WHERE flag_key = $1",
        )
        .bind(&flag.key)
        .bind(&flag.name)
        .bind(&flag.description)
        .bind(default_value)
        .bind(flag.enabled)
        .bind(flag.is_system_wide)
        .bind(&flag.category)
        .bind(flag.rollout_percentage.map(i16::from))
        .bind(rules)
        .bind(flag.start_date)
        .bind(flag.end_date)
        .bind(flag.archived)
        .bind(flag.version)
        .bind(flag.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(&format!("update flag '{}'", flag.key), e))?;
        timer.record();

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("flag '{}'", flag.key)));
        }
        Ok(())
    }

    async fn set_override(&self, ovr: &FlagOverride) -> Result<(), DomainError> {
        let timer = QueryTimer::new("set_override");
        // One override per (flag, target); repeats replace.
        sqlx::query(
            "INSERT INTO flag_overrides \
             (id, flag_id, target_type, target_id, enabled, reason, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (flag_id, target_type, target_id) DO UPDATE SET \
             id = EXCLUDED.id, enabled = EXCLUDED.enabled, reason = EXCLUDED.reason, \
             created_by = EXCLUDED.created_by, created_at = EXCLUDED.created_at",
        )
        .bind(ovr.id)
        .bind(ovr.flag_id)
        .bind(ovr.target_type.as_str())
        .bind(&ovr.target_id)
        .bind(ovr.enabled)
        .bind(&ovr.reason)
        .bind(&ovr.created_by)
        .bind(ovr.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("set override", e))?;
        timer.record();
        Ok(())
    }

    async fn remove_override(&self, flag_id: Uuid, override_id: Uuid) -> Result<(), DomainError> {
        let timer = QueryTimer::new("remove_override");
        let result = sqlx::query("DELETE FROM flag_overrides WHERE flag_id = $1 AND id = $2")
            .bind(flag_id)
            .bind(override_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("remove override", e))?;
        timer.record();

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("override {}", override_id)));
        }
        Ok(())
    }

    async fn overrides_for(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, DomainError> {
        let timer = QueryTimer::new("overrides_for_flag");
        let entities = sqlx::query_as::<_, FlagOverrideEntity>(
            "SELECT id, flag_id, target_type, target_id, enabled, reason, created_by, created_at \
             FROM flag_overrides WHERE flag_id = $1 ORDER BY created_at",
        )
        .bind(flag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list overrides", e))?;
        timer.record();
        entities
            .into_iter()
            .map(FlagOverrideEntity::into_domain)
            .collect()
    }

    async fn record_history(&self, entry: &FlagHistoryEntry) -> Result<(), DomainError> {
        let snapshot = encode_json("history snapshot", &entry.snapshot)?;
        let timer = QueryTimer::new("record_flag_history");
        sqlx::query(
            "INSERT INTO flag_history \
             (id, flag_id, version, snapshot, change_reason, changed_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.flag_id)
        .bind(entry.version)
        .bind(snapshot)
        .bind(&entry.change_reason)
        .bind(&entry.changed_by)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("record history", e))?;
        timer.record();
        Ok(())
    }

    async fn history(&self, flag_id: Uuid) -> Result<Vec<FlagHistoryEntry>, DomainError> {
        let timer = QueryTimer::new("flag_history");
        let entities = sqlx::query_as::<_, FlagHistoryEntity>(
            "SELECT id, flag_id, version, snapshot, change_reason, changed_by, created_at \
             FROM flag_history WHERE flag_id = $1 ORDER BY version DESC",
        )
        .bind(flag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list history", e))?;
        timer.record();
        entities
            .into_iter()
            .map(FlagHistoryEntity::into_domain)
            .collect()
    }

    async fn get_history_entry(&self, id: Uuid) -> Result<Option<FlagHistoryEntry>, DomainError> {
        let timer = QueryTimer::new("get_history_entry");
        let entity = sqlx::query_as::<_, FlagHistoryEntity>(
            "SELECT id, flag_id, version, snapshot, change_reason, changed_by, created_at \
             FROM flag_history WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get history entry", e))?;
        timer.record();
        entity.map(FlagHistoryEntity::into_domain).transpose()
    }
}
