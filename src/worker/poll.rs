/// Poll loop: fetch pending job ids oldest-first, claim each one, dispatch
/// the claimed jobs onto the bounded pool, then repeat.
///
/// Store failures while fetching back off exponentially and are retried
/// forever in continuous mode; in single-batch mode the first failure is
/// fatal so the process can exit non-zero.
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::pool::WorkerPool;
use crate::audit::{AuditLevel, AuditSink};
use crate::pipeline::{GenerationPipeline, ProviderFactory};
use crate::store::GenerationStore;
use crate::util::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub batch_size: i64,
    pub once: bool,
    pub poll_interval: std::time::Duration,
    pub network_retry: RetryConfig,
}

pub struct PollLoop<S, F, A> {
    store: Arc<S>,
    audit: Arc<A>,
    pipeline: Arc<GenerationPipeline<S, F, A>>,
    pool: WorkerPool,
    options: PollOptions,
}

impl<S, F, A> PollLoop<S, F, A>
where
    S: GenerationStore + 'static,
    F: ProviderFactory + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        audit: Arc<A>,
        pipeline: Arc<GenerationPipeline<S, F, A>>,
        pool: WorkerPool,
        options: PollOptions,
    ) -> Self {
        Self {
            store,
            audit,
            pipeline,
            pool,
            options,
        }
    }

    /// Runs the loop until the process stops, or for a single batch in
    /// `--once` mode.
    ///
    /// # Errors
    /// In single-batch mode a pending-fetch failure is returned to the
    /// caller, which maps it to a non-zero exit code.
    pub async fn run(&self) -> Result<()> {
        let mut network_failures: usize = 0;
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            let pending = match self.store.fetch_pending_ids(self.options.batch_size).await {
                Ok(ids) => {
                    network_failures = 0;
                    ids
                }
                Err(fetch_error) => {
                    network_failures += 1;
                    let delay = self.options.network_retry.delay_for_attempt(network_failures);
                    warn!(
                        attempt = network_failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %format!("{fetch_error:#}"),
                        "pending fetch failed"
                    );
                    if self.options.once {
                        return Err(fetch_error).context("pending fetch failed in single-batch mode");
                    }
                    sleep(delay).await;
                    continue;
                }
            };

            if pending.is_empty() {
                if self.options.once {
                    break;
                }
                sleep(self.options.poll_interval).await;
                continue;
            }

            for id in pending {
                let job = match self.store.claim(id).await {
                    Ok(Some(job)) => job,
                    // Already claimed by another worker, or no longer pending.
                    Ok(None) => continue,
                    Err(claim_error) => {
                        warn!(
                            generation_id = %id,
                            error = %format!("{claim_error:#}"),
                            "claim failed"
                        );
                        continue;
                    }
                };

                self.audit
                    .record(
                        job.id,
                        AuditLevel::Info,
                        "job_claimed",
                        "job claimed from pending queue",
                        json!({ "kind": job.kind.as_str() }),
                    )
                    .await;
                info!(
                    generation_id = %job.id,
                    kind = job.kind.as_str(),
                    "job claimed"
                );

                let Some(permit) = self.pool.acquire().await else {
                    error!("worker pool closed; stopping dispatch");
                    break;
                };
                let pipeline = Arc::clone(&self.pipeline);
                inflight.spawn(async move {
                    let _permit = permit;
                    pipeline.process(job).await;
                });
            }

            // Reap whatever already finished; submission itself stays
            // fire-and-forget per batch.
            while inflight.try_join_next().is_some() {}

            if self.options.once {
                break;
            }
        }

        // Let in-flight jobs reach a terminal status before returning.
        while inflight.join_next().await.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::audit::testing::RecordingAudit;
    use crate::clients::storage::{StorageConfig, SupabaseStorageClient};
    use crate::pipeline::{CostTable, GeminiProviderFactory, PipelineSettings};
    use crate::store::dao::mock::MockGenerationStore;
    use crate::store::models::{Archetype, Credential, GenerationKind, GenerationStatus};

    struct Harness {
        server: MockServer,
        store: Arc<MockGenerationStore>,
        audit: Arc<RecordingAudit>,
        poll: PollLoop<MockGenerationStore, GeminiProviderFactory, RecordingAudit>,
    }

    async fn harness(once: bool, max_workers: usize) -> Harness {
        let server = MockServer::start().await;
        let store = Arc::new(MockGenerationStore::new());
        let audit = Arc::new(RecordingAudit::new());
        let storage = Arc::new(
            SupabaseStorageClient::new(StorageConfig {
                base_url: server.uri(),
                service_key: "service-key".to_string(),
                bucket: "avatar-media".to_string(),
                timeout: Duration::from_secs(5),
            })
            .expect("storage client"),
        );
        let providers = Arc::new(GeminiProviderFactory {
            base_url: server.uri(),
            model: "gemini-2.5-flash-image".to_string(),
            timeout: Duration::from_secs(5),
        });
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::clone(&store),
            storage,
            providers,
            Arc::clone(&audit),
            PipelineSettings {
                output_prefix: "quiz".to_string(),
                retry: RetryConfig::new(3, Duration::from_millis(1), None),
                costs: CostTable::flat(0.04),
            },
        ));
        let poll = PollLoop::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            pipeline,
            WorkerPool::new(max_workers),
            PollOptions {
                batch_size: 20,
                once,
                poll_interval: Duration::from_millis(10),
                network_retry: RetryConfig::new(
                    usize::MAX,
                    Duration::from_millis(1),
                    Some(Duration::from_millis(4)),
                ),
            },
        );
        Harness {
            server,
            store,
            audit,
            poll,
        }
    }

    async fn mount_happy_backends(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/storage/v1/object/.*$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inlineData": { "data": BASE64.encode(b"png"), "mimeType": "image/png" } }]
                }
            }]
        });
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn seed_pending_job(store: &MockGenerationStore) -> Uuid {
        let experience_id = Uuid::new_v4();
        let credential_id = Uuid::new_v4();
        let job = MockGenerationStore::pending_generation(
            experience_id,
            credential_id,
            GenerationKind::QuizResult,
        );
        let job_id = job.id;
        store.put_generation(job);
        store.put_credential(Credential {
            id: credential_id,
            data: json!({ "name": "Ana" }),
            photo_path: None,
        });
        store.put_provider_key(experience_id, "exp-key");
        store.put_archetype(
            experience_id,
            0,
            Archetype {
                id: Uuid::new_v4(),
                name: None,
                image_prompt: Some("portrait of {{name}}".to_string()),
                use_photo_prompt: false,
            },
        );
        job_id
    }

    #[tokio::test]
    async fn once_mode_processes_one_batch_to_completion() {
        let h = harness(true, 2).await;
        mount_happy_backends(&h.server).await;
        let first = seed_pending_job(&h.store);
        let second = seed_pending_job(&h.store);

        h.poll.run().await.expect("single batch should succeed");

        for id in [first, second] {
            assert_eq!(
                h.store.generation(id).map(|g| g.status),
                Some(GenerationStatus::Done)
            );
        }
        assert_eq!(h.audit.count("job_claimed"), 2);
        assert_eq!(h.audit.count("job_done"), 2);
        assert_eq!(h.store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn once_mode_with_empty_queue_exits_cleanly() {
        let h = harness(true, 2).await;

        h.poll.run().await.expect("empty batch should succeed");

        assert_eq!(h.store.fetch_calls(), 1);
        assert!(h.audit.events().is_empty());
    }

    #[tokio::test]
    async fn once_mode_fetch_failure_is_fatal() {
        let h = harness(true, 2).await;
        h.store.fail_next_fetches(1);

        let error = h.poll.run().await.expect_err("fetch failure should abort");

        assert!(error.to_string().contains("single-batch mode"));
    }

    #[tokio::test]
    async fn continuous_mode_retries_fetch_failures_with_backoff() {
        let h = harness(false, 2).await;
        mount_happy_backends(&h.server).await;
        // Two failures, then a successful fetch that finds one job. The loop
        // is stopped by aborting after the job reaches a terminal state.
        h.store.fail_next_fetches(2);
        let job_id = seed_pending_job(&h.store);

        let poll = h.poll;
        let run = tokio::spawn(async move { poll.run().await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if h.store.generation(job_id).map(|g| g.status) == Some(GenerationStatus::Done) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never completed");
            sleep(Duration::from_millis(5)).await;
        }
        run.abort();

        assert!(h.store.fetch_calls() >= 3);
        assert_eq!(h.audit.count("job_done"), 1);
    }
}
