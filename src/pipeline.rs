pub mod card;
pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::audit::{AuditLevel, AuditSink};
use crate::clients::gemini::{GeminiConfig, GeminiImageClient, GeneratedImage, ImageProvider};
use crate::clients::storage::SupabaseStorageClient;
use crate::pipeline::card::{CARD_MIME_TYPE, build_card};
use crate::pipeline::prompt::{SubjectProfile, build_editorial_prompt, render};
use crate::store::GenerationStore;
use crate::store::models::{Generation, GenerationKind};
use crate::util::mime::ext_from_mime;
use crate::util::retry::RetryConfig;
use crate::util::text::truncate_chars;

const AUDIT_ERROR_MAX_CHARS: usize = 1000;

/// Builds a provider client bound to an experience-scoped API key.
pub trait ProviderFactory: Send + Sync {
    /// # Errors
    /// Returns an error when a client cannot be constructed for the key.
    fn create(&self, api_key: &str) -> Result<Arc<dyn ImageProvider>>;
}

/// Factory for the Gemini image API.
#[derive(Debug, Clone)]
pub struct GeminiProviderFactory {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl ProviderFactory for GeminiProviderFactory {
    fn create(&self, api_key: &str) -> Result<Arc<dyn ImageProvider>> {
        let client = GeminiImageClient::new(GeminiConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: api_key.to_string(),
            timeout: self.timeout,
        })?;
        Ok(Arc::new(client))
    }
}

/// Per-kind provider cost estimates recorded on finished jobs.
#[derive(Debug, Clone, Copy)]
pub struct CostTable {
    pub credential_card_usd: f64,
    pub quiz_result_usd: f64,
    pub photo_with_usd: f64,
}

impl CostTable {
    #[must_use]
    pub fn flat(cost_usd: f64) -> Self {
        Self {
            credential_card_usd: cost_usd,
            quiz_result_usd: cost_usd,
            photo_with_usd: cost_usd,
        }
    }

    #[must_use]
    pub fn for_kind(&self, kind: GenerationKind) -> f64 {
        match kind {
            GenerationKind::CredentialCard => self.credential_card_usd,
            GenerationKind::QuizResult => self.quiz_result_usd,
            GenerationKind::PhotoWith => self.photo_with_usd,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// First segment of every output path.
    pub output_prefix: String,
    /// Provider retry schedule.
    pub retry: RetryConfig,
    pub costs: CostTable,
}

/// Orchestrates one claimed generation job end to end.
///
/// A job handed to [`GenerationPipeline::process`] always reaches a terminal
/// status: `done` on success or degraded output, `error` on any fatal
/// failure. It is never left `processing`.
pub struct GenerationPipeline<S, F, A> {
    store: Arc<S>,
    storage: Arc<SupabaseStorageClient>,
    providers: Arc<F>,
    audit: Arc<A>,
    settings: PipelineSettings,
}

enum ProviderMode {
    Reference { bytes: Vec<u8>, mime: String },
    PromptOnly,
}

impl ProviderMode {
    fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Reference { .. } => "reference_photo",
            ProviderMode::PromptOnly => "prompt_only",
        }
    }
}

struct RunOutcome {
    output_path: String,
}

impl<S, F, A> GenerationPipeline<S, F, A>
where
    S: GenerationStore,
    F: ProviderFactory,
    A: AuditSink,
{
    pub fn new(
        store: Arc<S>,
        storage: Arc<SupabaseStorageClient>,
        providers: Arc<F>,
        audit: Arc<A>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            storage,
            providers,
            audit,
            settings,
        }
    }

    /// Runs one claimed job to a terminal status.
    pub async fn process(&self, job: Generation) {
        let started = Instant::now();
        self.audit
            .record(
                job.id,
                AuditLevel::Info,
                "job_started",
                "generation worker started processing job",
                json!({
                    "kind": job.kind.as_str(),
                    "experience_id": job.experience_id,
                    "credential_id": job.credential_id,
                }),
            )
            .await;

        let result = self.run(&job).await;
        let duration_ms = elapsed_ms(started);
        match result {
            Ok(outcome) => {
                let cost = self.settings.costs.for_kind(job.kind);
                match self
                    .store
                    .mark_done(job.id, duration_ms, &outcome.output_path, cost)
                    .await
                {
                    Ok(()) => {
                        info!(
                            generation_id = %job.id,
                            duration_ms,
                            output_path = %outcome.output_path,
                            "generation job completed"
                        );
                        self.audit
                            .record(
                                job.id,
                                AuditLevel::Info,
                                "job_done",
                                "generation job completed",
                                json!({
                                    "duration_ms": duration_ms,
                                    "cost_estimated_usd": cost,
                                    "cost_currency": "USD",
                                    "output_path": outcome.output_path,
                                }),
                            )
                            .await;
                    }
                    Err(store_error) => {
                        self.fail_job(&job, duration_ms, &format!("{store_error:#}"))
                            .await;
                    }
                }
            }
            Err(run_error) => {
                self.fail_job(&job, duration_ms, &format!("{run_error:#}"))
                    .await;
            }
        }
    }

    async fn fail_job(&self, job: &Generation, duration_ms: i64, message: &str) {
        error!(
            generation_id = %job.id,
            duration_ms,
            error = %message,
            "generation job failed"
        );
        if let Err(store_error) = self.store.mark_error(job.id, duration_ms, message).await {
            error!(
                generation_id = %job.id,
                error = %store_error,
                "failed to mark generation error"
            );
        }
        self.audit
            .record(
                job.id,
                AuditLevel::Error,
                "job_error",
                "generation job failed",
                json!({
                    "duration_ms": duration_ms,
                    "error": truncate_chars(message, AUDIT_ERROR_MAX_CHARS),
                }),
            )
            .await;
    }

    async fn run(&self, job: &Generation) -> Result<RunOutcome> {
        let credential = self
            .store
            .load_credential(job.credential_id)
            .await?
            .ok_or_else(|| anyhow!("credential {} not found", job.credential_id))?;

        let profile = SubjectProfile::from_data(&credential.data);
        self.audit
            .record(
                job.id,
                AuditLevel::Info,
                "credential_loaded",
                "credential row loaded",
                json!({
                    "has_photo_path": credential.photo_path.is_some(),
                    "has_data_json": credential.data_object().is_some(),
                    "gender": profile.gender.as_str(),
                    "hair_color": profile.hair_color.as_str(),
                    "winner_archetype_id": credential.winner_archetype_id(),
                }),
            )
            .await;

        // Winner archetype scoped to this experience, else the experience's
        // first archetype by sort order, else none.
        let mut archetype = match credential.winner_archetype_id() {
            Some(winner_id) => self.store.load_archetype(job.experience_id, winner_id).await?,
            None => None,
        };
        if archetype.is_none() {
            archetype = self.store.load_first_archetype(job.experience_id).await?;
        }

        let archetype_prompt = archetype
            .as_ref()
            .and_then(|a| a.image_prompt.as_deref())
            .map(|template| render(template, &credential.data))
            .unwrap_or_default();
        let prompt_source = if archetype_prompt.is_empty() {
            "fixed_default"
        } else {
            "archetype"
        };

        let api_key = self
            .store
            .resolve_experience_provider_key(job.experience_id)
            .await?
            .ok_or_else(|| anyhow!("missing experience gemini key"))?;

        let use_photo_prompt = archetype.as_ref().is_some_and(|a| a.use_photo_prompt);

        // A stored photo always selects the reference path; prompt-only needs
        // a rendered archetype prompt and use_photo_prompt off; anything else
        // skips the provider and ships a placeholder card.
        let mode = if let Some(photo_path) = credential.photo_path.as_deref() {
            let (bytes, mime) = self.storage.download(photo_path).await?;
            Some(ProviderMode::Reference { bytes, mime })
        } else if !archetype_prompt.is_empty() && !use_photo_prompt {
            Some(ProviderMode::PromptOnly)
        } else {
            None
        };

        let Some(mode) = mode else {
            let bytes = build_card(job, &credential);
            let output_path = self.upload_output(job, bytes, CARD_MIME_TYPE).await?;
            self.audit
                .record(
                    job.id,
                    AuditLevel::Warning,
                    "fallback_card_output",
                    "placeholder card output used (provider path not eligible)",
                    json!({
                        "has_photo_path": credential.photo_path.is_some(),
                        "use_photo_prompt": use_photo_prompt,
                        "has_archetype_prompt": !archetype_prompt.is_empty(),
                        "output_path": &output_path,
                    }),
                )
                .await;
            return Ok(RunOutcome { output_path });
        };

        let prompt_applied = if archetype_prompt.is_empty() {
            build_editorial_prompt(profile)
        } else {
            archetype_prompt.clone()
        };

        let provider = self.providers.create(&api_key)?;
        let generation_started = Instant::now();
        let generated = self
            .generate_with_retry(job, provider.as_ref(), &mode, &prompt_applied)
            .await?;
        let latency_ms = elapsed_ms(generation_started);

        let (bytes, mime) = match generated {
            Some(image) => {
                let mime = image.mime_type.clone();
                self.audit
                    .record(
                        job.id,
                        AuditLevel::Info,
                        "gemini_generated",
                        "provider generated output image",
                        json!({
                            "model": image.model,
                            "latency_ms": latency_ms,
                            "mime_type": &mime,
                            "prompt_source": prompt_source,
                            "prompt_chars": prompt_applied.chars().count(),
                            "archetype_id": archetype.as_ref().map(|a| a.id),
                            "archetype_name": archetype.as_ref().and_then(|a| a.name.clone()),
                            "generation_mode": mode.as_str(),
                            "use_photo_prompt": use_photo_prompt,
                            "gemini_key_source": "experience",
                        }),
                    )
                    .await;
                (image.image_bytes, mime)
            }
            // Retries exhausted on only-retryable errors: degrade instead of
            // failing so the user flow stays alive.
            None => match &mode {
                ProviderMode::Reference { bytes, mime } => {
                    self.audit
                        .record(
                            job.id,
                            AuditLevel::Warning,
                            "gemini_fallback_reference_image",
                            "provider failed after retries; using reference photo fallback",
                            json!({
                                "max_attempts": self.settings.retry.max_attempts,
                                "mime_type": mime,
                            }),
                        )
                        .await;
                    (bytes.clone(), mime.clone())
                }
                ProviderMode::PromptOnly => {
                    self.audit
                        .record(
                            job.id,
                            AuditLevel::Warning,
                            "gemini_fallback_card",
                            "provider failed after retries; using placeholder card fallback",
                            json!({
                                "max_attempts": self.settings.retry.max_attempts,
                            }),
                        )
                        .await;
                    (build_card(job, &credential), CARD_MIME_TYPE.to_string())
                }
            },
        };

        let output_path = self.upload_output(job, bytes, &mime).await?;
        Ok(RunOutcome { output_path })
    }

    /// Runs the provider attempt loop.
    ///
    /// `Ok(Some(image))` on success, `Ok(None)` when every attempt failed
    /// with a retryable error (the caller degrades), `Err` on the first
    /// fatal error.
    async fn generate_with_retry(
        &self,
        job: &Generation,
        provider: &dyn ImageProvider,
        mode: &ProviderMode,
        prompt: &str,
    ) -> Result<Option<GeneratedImage>> {
        let retry = self.settings.retry;
        for attempt in 1..=retry.max_attempts {
            let result = match mode {
                ProviderMode::Reference { bytes, mime } => {
                    provider.generate_from_reference(prompt, bytes, mime).await
                }
                ProviderMode::PromptOnly => provider.generate_from_prompt(prompt).await,
            };

            match result {
                Ok(image) => {
                    if attempt > 1 {
                        self.audit
                            .record(
                                job.id,
                                AuditLevel::Info,
                                "gemini_retry_recovered",
                                "provider succeeded after retry",
                                json!({
                                    "attempt": attempt,
                                    "max_attempts": retry.max_attempts,
                                }),
                            )
                            .await;
                    }
                    return Ok(Some(image));
                }
                Err(provider_error) => {
                    let retryable = provider_error.is_retryable();
                    let level = if retryable {
                        AuditLevel::Warning
                    } else {
                        AuditLevel::Error
                    };
                    warn!(
                        generation_id = %job.id,
                        attempt,
                        max_attempts = retry.max_attempts,
                        retryable,
                        error = %provider_error,
                        "provider generation attempt failed"
                    );
                    self.audit
                        .record(
                            job.id,
                            level,
                            "gemini_attempt_failed",
                            "provider generation attempt failed",
                            json!({
                                "attempt": attempt,
                                "max_attempts": retry.max_attempts,
                                "retryable": retryable,
                                "error": truncate_chars(
                                    &provider_error.to_string(),
                                    AUDIT_ERROR_MAX_CHARS,
                                ),
                            }),
                        )
                        .await;
                    if !retryable {
                        return Err(anyhow::Error::new(provider_error)
                            .context("provider generation failed"));
                    }
                    if retry.can_retry(attempt) {
                        sleep(retry.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }
        Ok(None)
    }

    async fn upload_output(
        &self,
        job: &Generation,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<String> {
        let ext = ext_from_mime(mime);
        let output_path = format!(
            "{}/{}/generations/{}.{ext}",
            self.settings.output_prefix, job.experience_id, job.id
        );
        self.storage
            .upload(&output_path, mime, bytes)
            .await
            .context("failed to upload generation output")?;
        self.audit
            .record(
                job.id,
                AuditLevel::Info,
                "output_uploaded",
                "output uploaded to storage",
                json!({ "output_path": &output_path }),
            )
            .await;
        Ok(output_path)
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
