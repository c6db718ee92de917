use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forge::config::Config;
use forge::db::{create_pool, ensure_schema};
use forge::pipeline::{
    PdfGenerationHandler, ResumeUpdateHandler, Supervisor, Worker, WorkerConfig,
};
use forge::queue::{QueueClient, SqsQueue};
use forge::render::StubPdfRenderer;
use forge::store::PgResumeStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DevResume Forge workers v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    ensure_schema(&db).await?;
    let store = Arc::new(PgResumeStore::new(db));

    // Initialize SQS
    let sqs = Arc::new(SqsQueue::from_config(&config).await);
    let wait_time = Duration::from_secs(config.worker_wait_time_secs.max(0) as u64);
    let queue = QueueClient::new(sqs, config.queue_router()).with_wait_time(wait_time);
    info!(region = %config.aws_region, "SQS client initialized");
    if !queue.router().has_dead_letter() {
        info!("SQS_DEAD_LETTER_URL not set; unprocessable messages stay on their queue");
    }

    let renderer = Arc::new(StubPdfRenderer::from_config(&config));
    let worker_config = WorkerConfig::from_config(&config);

    let supervisor = Supervisor::new()
        .with_worker(Arc::new(Worker::new(
            ResumeUpdateHandler::new(store.clone()),
            queue.clone(),
            worker_config.clone(),
        )))
        .with_worker(Arc::new(Worker::new(
            PdfGenerationHandler::new(store, renderer),
            queue,
            worker_config,
        )));

    supervisor.start_all();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    supervisor.shutdown().await;

    Ok(())
}
