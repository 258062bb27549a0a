/// Best-effort audit sink for per-generation lifecycle events.
///
/// Rows are append-only; a failed write must never affect the outcome of the
/// job being processed, so implementations swallow their own errors.
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one lifecycle event. Never fails the caller.
    async fn record(
        &self,
        generation_id: Uuid,
        level: AuditLevel,
        event: &str,
        message: &str,
        payload: Value,
    );
}

/// Postgres-backed audit sink writing to `generation_logs`.
#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn record(
        &self,
        generation_id: Uuid,
        level: AuditLevel,
        event: &str,
        message: &str,
        payload: Value,
    ) {
        let result = sqlx::query(
            r"
            INSERT INTO generation_logs (generation_id, level, event, message, payload_json)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(generation_id)
        .bind(level.as_str())
        .bind(event)
        .bind(message)
        .bind(payload)
        .execute(&self.pool)
        .await;

        // A missing table or unreachable store must not fail the generation.
        if let Err(error) = result {
            tracing::debug!(
                generation_id = %generation_id,
                event,
                error = %error,
                "generation log write failed"
            );
        }
    }
}
