mod consumer;

use std::sync::Arc;

use anyhow::Context;
use arbiter_common::config::ArbiterConfig;
use arbiter_common::redis::{RedisQueue, RedisStore};
use arbiter_judge::docker::DockerRuntime;
use arbiter_judge::{Judge, LanguageRegistry, SandboxExecutor};
use consumer::Consumer;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Arbiter Worker booting...");

    let config = ArbiterConfig::from_env().context("Invalid worker configuration")?;

    // Load language configurations
    let registry = LanguageRegistry::load(&config.languages_path).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Make sure {} exists", config.languages_path.display());
        e
    })?;
    info!(languages = ?registry.list_languages(), "Loaded language configurations");

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let sandbox = SandboxExecutor::new(Arc::new(runtime), config.sandbox.work_root.clone());
    let judge = Arc::new(Judge::new(sandbox, Arc::new(registry), config.sandbox.clone()));

    let store = Arc::new(RedisStore::new(conn.clone()));
    let queue = Arc::new(RedisQueue::new(
        conn,
        config.queue.name.clone(),
        std::time::Duration::from_secs(config.queue.visibility_timeout_secs),
        config.queue.max_receives,
    ));
    info!(
        queue = %config.queue.name,
        visibility_timeout_secs = config.queue.visibility_timeout_secs,
        max_receives = config.queue.max_receives,
        "Queue configured"
    );

    let consumer = Consumer::new(
        queue,
        store.clone(),
        store.clone(),
        store,
        judge,
        config.lookup_retry(),
        config.poll_timeout(),
        config.queue.max_receives,
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Received shutdown signal, finishing current job..."),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        trigger.cancel();
    });

    consumer.run(shutdown).await;

    info!("Worker shutdown complete");
    Ok(())
}
