use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::traits::GenerationStore;
use crate::store::models::{Archetype, Credential, Generation, GenerationKind, GenerationStatus};
use crate::util::text::truncate_chars;

/// Maximum stored length for `error_message`, keeping status reads actionable
/// without leaking unbounded internal detail.
const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

const GENERATION_COLUMNS: &str = "id, experience_id, credential_id, kind, status, \
     output_path, output_url, error_message, duration_ms, \
     cost_estimated_usd, cost_currency, created_at, updated_at";

/// Postgres-backed [`GenerationStore`].
#[derive(Debug, Clone)]
pub struct PgGenerationStore {
    pool: PgPool,
}

impl PgGenerationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_generation(row: &sqlx::postgres::PgRow) -> Result<Generation> {
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let status = GenerationStatus::from_str(&status_str)
            .with_context(|| format!("invalid generation status: {status_str}"))?;
        let kind_str: String = row.try_get("kind").context("failed to get kind")?;
        let kind = GenerationKind::from_str(&kind_str).unwrap_or(GenerationKind::QuizResult);

        Ok(Generation {
            id: row.try_get("id").context("failed to get id")?,
            experience_id: row
                .try_get("experience_id")
                .context("failed to get experience_id")?,
            credential_id: row
                .try_get("credential_id")
                .context("failed to get credential_id")?,
            kind,
            status,
            output_path: row.try_get("output_path").ok().flatten(),
            output_url: row.try_get("output_url").ok().flatten(),
            error_message: row.try_get("error_message").ok().flatten(),
            duration_ms: row.try_get("duration_ms").ok().flatten(),
            cost_estimated_usd: row.try_get("cost_estimated_usd").ok().flatten(),
            cost_currency: row.try_get("cost_currency").ok().flatten(),
            created_at: row
                .try_get("created_at")
                .context("failed to get created_at")?,
            updated_at: row
                .try_get("updated_at")
                .context("failed to get updated_at")?,
        })
    }
}

#[async_trait]
impl GenerationStore for PgGenerationStore {
    async fn claim(&self, id: Uuid) -> Result<Option<Generation>> {
        let sql = format!(
            r"
            UPDATE generations
            SET status = 'processing',
                updated_at = NOW(),
                error_message = NULL
            WHERE id = $1 AND status = 'pending'
            RETURNING {GENERATION_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to claim generation")?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_generation(&row)?))
    }

    async fn fetch_pending_ids(&self, limit: i64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r"
            SELECT id
            FROM generations
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch pending generations")?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id").context("failed to get pending id")?);
        }
        Ok(ids)
    }

    async fn mark_done(
        &self,
        id: Uuid,
        duration_ms: i64,
        output_path: &str,
        cost_estimated_usd: f64,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE generations
            SET status = 'done',
                duration_ms = $2,
                output_path = $3,
                output_url = NULL,
                cost_estimated_usd = $4,
                cost_currency = 'USD',
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(duration_ms)
        .bind(output_path)
        .bind(cost_estimated_usd)
        .execute(&self.pool)
        .await
        .context("failed to mark generation done")?;

        if result.rows_affected() == 0 {
            tracing::warn!(generation_id = %id, "mark_done affected 0 rows - row may have been deleted");
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, duration_ms: i64, message: &str) -> Result<()> {
        let truncated = truncate_chars(message, MAX_ERROR_MESSAGE_CHARS);
        let result = sqlx::query(
            r"
            UPDATE generations
            SET status = 'error',
                duration_ms = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(duration_ms)
        .bind(truncated)
        .execute(&self.pool)
        .await
        .context("failed to mark generation error")?;

        if result.rows_affected() == 0 {
            tracing::warn!(generation_id = %id, "mark_error affected 0 rows - row may have been deleted");
        }
        Ok(())
    }

    async fn load_credential(&self, id: Uuid) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r"
            SELECT id, data_json, photo_path
            FROM credentials
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load credential")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: serde_json::Value = row
            .try_get("data_json")
            .unwrap_or(serde_json::Value::Null);
        let photo_path: Option<String> = row.try_get("photo_path").ok().flatten();
        let photo_path = photo_path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Some(Credential {
            id: row.try_get("id").context("failed to get credential id")?,
            data,
            photo_path,
        }))
    }

    async fn load_archetype(
        &self,
        experience_id: Uuid,
        archetype_id: Uuid,
    ) -> Result<Option<Archetype>> {
        let row = sqlx::query(
            r"
            SELECT id, name, image_prompt, use_photo_prompt
            FROM archetypes
            WHERE id = $1 AND experience_id = $2
            ",
        )
        .bind(archetype_id)
        .bind(experience_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load archetype")?;

        row.map(|row| row_to_archetype(&row)).transpose()
    }

    async fn load_first_archetype(&self, experience_id: Uuid) -> Result<Option<Archetype>> {
        let row = sqlx::query(
            r"
            SELECT id, name, image_prompt, use_photo_prompt
            FROM archetypes
            WHERE experience_id = $1
            ORDER BY sort_order ASC
            LIMIT 1
            ",
        )
        .bind(experience_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load first archetype")?;

        row.map(|row| row_to_archetype(&row)).transpose()
    }

    async fn resolve_experience_provider_key(
        &self,
        experience_id: Uuid,
    ) -> Result<Option<String>> {
        // A missing column or row deterministically resolves to "no key";
        // the pipeline turns that into a fatal job error.
        let row = sqlx::query(
            r"
            SELECT gemini_api_key
            FROM experiences
            WHERE id = $1
            ",
        )
        .bind(experience_id)
        .fetch_optional(&self.pool)
        .await;

        let Ok(Some(row)) = row else {
            return Ok(None);
        };

        let key: Option<String> = row.try_get("gemini_api_key").ok().flatten();
        Ok(key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()))
    }

    async fn find_reusable(
        &self,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Option<Generation>> {
        let sql = format!(
            r"
            SELECT {GENERATION_COLUMNS}
            FROM generations
            WHERE credential_id = $1
              AND kind = $2
              AND status IN ('pending', 'processing', 'done')
            ORDER BY created_at DESC
            LIMIT 1
            "
        );
        let row = sqlx::query(&sql)
            .bind(credential_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up reusable generation")?;

        row.map(|row| Self::row_to_generation(&row)).transpose()
    }

    async fn insert_pending(
        &self,
        experience_id: Uuid,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Generation> {
        let sql = format!(
            r"
            INSERT INTO generations (experience_id, credential_id, kind, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING {GENERATION_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(experience_id)
            .bind(credential_id)
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .context("failed to insert generation")?;

        Self::row_to_generation(&row)
    }
}

fn row_to_archetype(row: &sqlx::postgres::PgRow) -> Result<Archetype> {
    Ok(Archetype {
        id: row.try_get("id").context("failed to get archetype id")?,
        name: row.try_get("name").ok().flatten(),
        image_prompt: row.try_get("image_prompt").ok().flatten(),
        use_photo_prompt: row.try_get("use_photo_prompt").unwrap_or(false),
    })
}
