mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use arbiter_common::accessor::SubmissionAccessor;
use arbiter_common::config::ArbiterConfig;
use arbiter_common::queue::JobQueue;
use arbiter_common::redis::{RedisQueue, RedisStore};
use arbiter_judge::docker::DockerRuntime;
use arbiter_judge::{Judge, LanguageRegistry, RunService, SandboxExecutor};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub runner: Arc<RunService>,
    pub submissions: Arc<dyn SubmissionAccessor>,
    pub queue: Arc<dyn JobQueue>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Arbiter API booting...");

    let config = ArbiterConfig::from_env().context("Invalid API configuration")?;
    let registry = LanguageRegistry::load(&config.languages_path)
        .with_context(|| format!("Failed to load {}", config.languages_path.display()))?;
    info!(languages = ?registry.list_languages(), "Loaded language configurations");

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis_url);

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let sandbox = SandboxExecutor::new(Arc::new(runtime), config.sandbox.work_root.clone());
    let judge = Arc::new(Judge::new(sandbox, Arc::new(registry), config.sandbox.clone()));

    let store = Arc::new(RedisStore::new(conn.clone()));
    let queue = Arc::new(RedisQueue::new(
        conn,
        config.queue.name.clone(),
        Duration::from_secs(config.queue.visibility_timeout_secs),
        config.queue.max_receives,
    ));

    let state = Arc::new(AppState {
        runner: Arc::new(RunService::new(judge, store.clone(), config.scratch.clone())),
        submissions: store,
        queue,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.api_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_addr))?;

    info!("HTTP server listening on {}", config.api_addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
