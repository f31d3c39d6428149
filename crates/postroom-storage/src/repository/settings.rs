//! Runtime settings repository
//!
//! Settings live in a key/value table with JSON values and are read back as
//! one aggregated object. Workers re-read them every tick so operators can
//! change limits without a restart.

use sqlx::PgPool;

use crate::models::Settings;

/// Settings repository
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    /// Create a new settings repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the aggregated settings object. An empty settings table yields
    /// all defaults.
    pub async fn get(&self) -> Result<Settings, sqlx::Error> {
        let (raw,): (Option<serde_json::Value>,) = sqlx::query_as(
            r#"
            SELECT JSON_OBJECT_AGG(key, value) AS settings
            FROM (SELECT * FROM settings ORDER BY key) t
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let raw = raw.unwrap_or_else(|| serde_json::json!({}));
        serde_json::from_value(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    /// Write one settings key
    pub async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip the master queue pause switch
    pub async fn set_queue_paused(&self, paused: bool) -> Result<(), sqlx::Error> {
        self.set("app.queue_paused", &serde_json::Value::Bool(paused))
            .await
    }
}
