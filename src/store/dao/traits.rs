//! GenerationStore trait - generation queue data access

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::models::{Archetype, Credential, Generation, GenerationKind};

/// Data access layer for the generation queue and its read-only collaborators.
///
/// The conditional `claim` update is the only concurrency-control primitive
/// the worker relies on; everything else a job touches is private to that
/// job's task.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Atomically transitions one job from `pending` to `processing`.
    ///
    /// Returns the updated row, or `None` when the row was already claimed
    /// by another worker or is no longer pending.
    async fn claim(&self, id: Uuid) -> Result<Option<Generation>>;

    /// Fetches up to `limit` pending job ids, oldest first.
    async fn fetch_pending_ids(&self, limit: i64) -> Result<Vec<Uuid>>;

    /// Finalizes a job as `done` with its output path and cost estimate.
    async fn mark_done(
        &self,
        id: Uuid,
        duration_ms: i64,
        output_path: &str,
        cost_estimated_usd: f64,
    ) -> Result<()>;

    /// Finalizes a job as `error` with a truncated message.
    async fn mark_error(&self, id: Uuid, duration_ms: i64, message: &str) -> Result<()>;

    /// Loads the credential a job renders from.
    async fn load_credential(&self, id: Uuid) -> Result<Option<Credential>>;

    /// Loads one archetype scoped to an experience.
    async fn load_archetype(
        &self,
        experience_id: Uuid,
        archetype_id: Uuid,
    ) -> Result<Option<Archetype>>;

    /// Loads the experience's first archetype by sort order.
    async fn load_first_archetype(&self, experience_id: Uuid) -> Result<Option<Archetype>>;

    /// Resolves the experience-scoped image provider key.
    ///
    /// Strict policy: there is no global-key fallback; `None` means the
    /// experience cannot generate through the provider at all.
    async fn resolve_experience_provider_key(&self, experience_id: Uuid)
    -> Result<Option<String>>;

    /// Finds the most recent non-`error` generation for `(credential, kind)`.
    async fn find_reusable(
        &self,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Option<Generation>>;

    /// Inserts a fresh `pending` generation and returns the created row.
    async fn insert_pending(
        &self,
        experience_id: Uuid,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Generation>;

    /// Returns an existing reusable generation for the pair, or inserts a new
    /// pending one. The flag is `true` when an existing row was reused.
    ///
    /// Keeps repeated requests idempotent from the caller's perspective and
    /// bounds provider spend.
    async fn create_or_reuse(
        &self,
        experience_id: Uuid,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<(Generation, bool)> {
        if let Some(existing) = self.find_reusable(credential_id, kind).await? {
            return Ok((existing, true));
        }
        let created = self
            .insert_pending(experience_id, credential_id, kind)
            .await?;
        Ok((created, false))
    }
}
