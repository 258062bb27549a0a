// In-memory GenerationStore for tests: no database required, claim stays
// atomic under a single mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::traits::GenerationStore;
use crate::store::models::{Archetype, Credential, Generation, GenerationKind, GenerationStatus};

#[derive(Default)]
struct MockState {
    generations: HashMap<Uuid, Generation>,
    credentials: HashMap<Uuid, Credential>,
    archetypes: Vec<(Uuid, i32, Archetype)>,
    provider_keys: HashMap<Uuid, String>,
    fetch_failures_remaining: u32,
    fetch_calls: u32,
}

pub(crate) struct MockGenerationStore {
    state: Mutex<MockState>,
}

impl MockGenerationStore {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub(crate) fn pending_generation(
        experience_id: Uuid,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Generation {
        let now = Utc::now();
        Generation {
            id: Uuid::new_v4(),
            experience_id,
            credential_id,
            kind,
            status: GenerationStatus::Pending,
            output_path: None,
            output_url: None,
            error_message: None,
            duration_ms: None,
            cost_estimated_usd: None,
            cost_currency: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn put_generation(&self, generation: Generation) {
        let mut state = self.state.lock().expect("mock store lock");
        state.generations.insert(generation.id, generation);
    }

    pub(crate) fn put_credential(&self, credential: Credential) {
        let mut state = self.state.lock().expect("mock store lock");
        state.credentials.insert(credential.id, credential);
    }

    pub(crate) fn put_archetype(&self, experience_id: Uuid, sort_order: i32, archetype: Archetype) {
        let mut state = self.state.lock().expect("mock store lock");
        state.archetypes.push((experience_id, sort_order, archetype));
    }

    pub(crate) fn put_provider_key(&self, experience_id: Uuid, key: &str) {
        let mut state = self.state.lock().expect("mock store lock");
        state.provider_keys.insert(experience_id, key.to_string());
    }

    pub(crate) fn generation(&self, id: Uuid) -> Option<Generation> {
        let state = self.state.lock().expect("mock store lock");
        state.generations.get(&id).cloned()
    }

    /// Makes the next `count` pending fetches fail, simulating a network
    /// outage between worker and store.
    pub(crate) fn fail_next_fetches(&self, count: u32) {
        let mut state = self.state.lock().expect("mock store lock");
        state.fetch_failures_remaining = count;
    }

    pub(crate) fn fetch_calls(&self) -> u32 {
        let state = self.state.lock().expect("mock store lock");
        state.fetch_calls
    }
}

#[async_trait]
impl GenerationStore for MockGenerationStore {
    async fn claim(&self, id: Uuid) -> Result<Option<Generation>> {
        let mut state = self.state.lock().expect("mock store lock");
        let Some(generation) = state.generations.get_mut(&id) else {
            return Ok(None);
        };
        if generation.status != GenerationStatus::Pending {
            return Ok(None);
        }
        generation.status = GenerationStatus::Processing;
        generation.error_message = None;
        generation.updated_at = Utc::now();
        Ok(Some(generation.clone()))
    }

    async fn fetch_pending_ids(&self, limit: i64) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().expect("mock store lock");
        state.fetch_calls += 1;
        if state.fetch_failures_remaining > 0 {
            state.fetch_failures_remaining -= 1;
            return Err(anyhow!("connection reset by peer"));
        }
        let mut pending: Vec<&Generation> = state
            .generations
            .values()
            .filter(|g| g.status == GenerationStatus::Pending)
            .collect();
        pending.sort_by_key(|g| g.created_at);
        Ok(pending
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|g| g.id)
            .collect())
    }

    async fn mark_done(
        &self,
        id: Uuid,
        duration_ms: i64,
        output_path: &str,
        cost_estimated_usd: f64,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("mock store lock");
        if let Some(generation) = state.generations.get_mut(&id) {
            generation.status = GenerationStatus::Done;
            generation.duration_ms = Some(duration_ms);
            generation.output_path = Some(output_path.to_string());
            generation.cost_estimated_usd = Some(cost_estimated_usd);
            generation.cost_currency = Some("USD".to_string());
            generation.error_message = None;
            generation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, duration_ms: i64, message: &str) -> Result<()> {
        let mut state = self.state.lock().expect("mock store lock");
        if let Some(generation) = state.generations.get_mut(&id) {
            generation.status = GenerationStatus::Error;
            generation.duration_ms = Some(duration_ms);
            generation.error_message = Some(message.chars().take(1000).collect());
            generation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn load_credential(&self, id: Uuid) -> Result<Option<Credential>> {
        let state = self.state.lock().expect("mock store lock");
        Ok(state.credentials.get(&id).cloned())
    }

    async fn load_archetype(
        &self,
        experience_id: Uuid,
        archetype_id: Uuid,
    ) -> Result<Option<Archetype>> {
        let state = self.state.lock().expect("mock store lock");
        Ok(state
            .archetypes
            .iter()
            .find(|(exp, _, archetype)| *exp == experience_id && archetype.id == archetype_id)
            .map(|(_, _, archetype)| archetype.clone()))
    }

    async fn load_first_archetype(&self, experience_id: Uuid) -> Result<Option<Archetype>> {
        let state = self.state.lock().expect("mock store lock");
        Ok(state
            .archetypes
            .iter()
            .filter(|(exp, _, _)| *exp == experience_id)
            .min_by_key(|(_, sort_order, _)| *sort_order)
            .map(|(_, _, archetype)| archetype.clone()))
    }

    async fn resolve_experience_provider_key(
        &self,
        experience_id: Uuid,
    ) -> Result<Option<String>> {
        let state = self.state.lock().expect("mock store lock");
        Ok(state.provider_keys.get(&experience_id).cloned())
    }

    async fn find_reusable(
        &self,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Option<Generation>> {
        let state = self.state.lock().expect("mock store lock");
        let mut candidates: Vec<&Generation> = state
            .generations
            .values()
            .filter(|g| {
                g.credential_id == credential_id
                    && g.kind == kind
                    && g.status != GenerationStatus::Error
            })
            .collect();
        candidates.sort_by_key(|g| g.created_at);
        Ok(candidates.last().map(|g| (*g).clone()))
    }

    async fn insert_pending(
        &self,
        experience_id: Uuid,
        credential_id: Uuid,
        kind: GenerationKind,
    ) -> Result<Generation> {
        let generation = Self::pending_generation(experience_id, credential_id, kind);
        let mut state = self.state.lock().expect("mock store lock");
        state.generations.insert(generation.id, generation.clone());
        Ok(generation)
    }
}
