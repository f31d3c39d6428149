//! Bounce repository
//!
//! Default destination for recorded bounces. Resolves the subscriber by id,
//! UUID or email so provider webhooks that only carry an address still land
//! on the right row.

use sqlx::PgPool;

use crate::models::Bounce;

/// Bounce repository
#[derive(Clone)]
pub struct BounceRepository {
    pool: PgPool,
}

impl BounceRepository {
    /// Create a new bounce repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a bounce. The subscriber is matched by explicit id first,
    /// then UUID, then lowercased email; unmatched bounces are dropped with
    /// an error so the caller can log them.
    pub async fn record(&self, bounce: &Bounce) -> Result<(), sqlx::Error> {
        let subscriber_id = match bounce.subscriber_id {
            Some(id) => id,
            None => self.resolve_subscriber(bounce).await?,
        };

        let campaign_id: Option<(i32,)> = match &bounce.campaign_uuid {
            Some(uuid) => {
                sqlx::query_as("SELECT id FROM campaigns WHERE uuid = $1::uuid")
                    .bind(uuid)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO bounces
                (subscriber_id, campaign_id, type, source, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()))
            "#,
        )
        .bind(subscriber_id)
        .bind(campaign_id.map(|(id,)| id))
        .bind(bounce.bounce_type.as_str())
        .bind(&bounce.source)
        .bind(&bounce.meta)
        .bind(bounce.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_subscriber(&self, bounce: &Bounce) -> Result<i64, sqlx::Error> {
        if !bounce.subscriber_uuid.is_empty() {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM subscribers WHERE uuid = $1::uuid")
                    .bind(&bounce.subscriber_uuid)
                    .fetch_optional(&self.pool)
                    .await?;

            if let Some((id,)) = row {
                return Ok(id);
            }
        }

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM subscribers WHERE email = LOWER($1)")
                .bind(&bounce.email)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id,)| id).ok_or(sqlx::Error::RowNotFound)
    }
}
