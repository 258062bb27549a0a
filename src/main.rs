use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use quizgen_worker::{
    audit::PgAuditLog,
    clients::storage::{StorageConfig, SupabaseStorageClient},
    config::Config,
    observability,
    pipeline::{CostTable, GeminiProviderFactory, GenerationPipeline, PipelineSettings},
    store::{PgGenerationStore, models::GenerationKind},
    util::retry::RetryConfig,
    worker::{PollLoop, WorkerArgs, WorkerPool},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    observability::init().context("failed to initialize tracing")?;
    let args = WorkerArgs::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    // Lazy connect: a store outage at startup is handled by the poll loop's
    // network backoff instead of killing the process.
    let pool = PgPoolOptions::new()
        .max_connections(config.generation_db_max_connections())
        .acquire_timeout(config.generation_db_acquire_timeout())
        .connect_lazy(config.generation_db_dsn())
        .context("failed to configure database pool")?;

    let store = Arc::new(PgGenerationStore::new(pool.clone()));
    let audit = Arc::new(PgAuditLog::new(pool));
    let storage = Arc::new(
        SupabaseStorageClient::new(StorageConfig {
            base_url: config.supabase_url().to_string(),
            service_key: config.supabase_service_key().to_string(),
            bucket: config.supabase_bucket().to_string(),
            timeout: config.storage_timeout(),
        })
        .context("failed to build storage client")?,
    );
    let providers = Arc::new(GeminiProviderFactory {
        base_url: config.gemini_base_url().to_string(),
        model: config.gemini_image_model().to_string(),
        timeout: config.gemini_timeout(),
    });

    let settings = PipelineSettings {
        output_prefix: config.output_prefix().to_string(),
        retry: RetryConfig::new(
            config.gemini_max_attempts(),
            config.gemini_retry_base_delay(),
            None,
        ),
        costs: CostTable {
            credential_card_usd: config.estimated_cost_usd(GenerationKind::CredentialCard),
            quiz_result_usd: config.estimated_cost_usd(GenerationKind::QuizResult),
            photo_with_usd: config.estimated_cost_usd(GenerationKind::PhotoWith),
        },
    };
    let pipeline = Arc::new(GenerationPipeline::new(
        Arc::clone(&store),
        storage,
        providers,
        Arc::clone(&audit),
        settings,
    ));

    info!(
        max_workers = args.max_workers,
        batch_size = args.batch_size,
        once = args.once,
        "starting generation worker"
    );

    let poll = PollLoop::new(
        store,
        audit,
        pipeline,
        WorkerPool::new(args.max_workers),
        args.poll_options(),
    );
    poll.run().await
}
