// Operator commands for Arbiter
use anyhow::{bail, Context, Result};
use arbiter_common::accessor::SubmissionAccessor;
use arbiter_common::config::ArbiterConfig;
use arbiter_common::memory::MemoryStore;
use arbiter_common::queue::enqueue_submission;
use arbiter_common::redis::{RedisQueue, RedisStore};
use arbiter_common::types::FunctionSignature;
use arbiter_judge::docker::DockerRuntime;
use arbiter_judge::harness;
use arbiter_judge::{Judge, LanguageRegistry, RunService, SandboxExecutor, ScratchStatus};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Load the registry from `path`, or the compiled-in languages when the file is absent
fn load_registry(path: &Path) -> Result<LanguageRegistry> {
    if path.exists() {
        LanguageRegistry::load(path)
    } else {
        println!("⚠️  {} not found, using built-in languages\n", path.display());
        LanguageRegistry::builtin()
    }
}

fn load_signature(path: &Path) -> Result<FunctionSignature> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read signature file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse signature file {}", path.display()))
}

/// List configured languages
pub fn list_languages(config_path: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;
    let names = registry.list_languages();

    println!("📋 Configured Languages:\n");
    println!(
        "{:<10} {:<10} {:<34} {:<8} {:<6}",
        "NAME", "VERSION", "IMAGE", "HARNESS", "TIME x"
    );
    println!("{}", "─".repeat(72));

    for name in &names {
        let lang = registry.get(name)?;
        println!(
            "{:<10} {:<10} {:<34} {:<8} {:.1}",
            lang.name,
            lang.version,
            lang.image,
            format!("{:?}", lang.harness).to_lowercase(),
            lang.time_multiplier
        );
    }

    println!("\n✅ Total: {} language(s)", names.len());
    Ok(())
}

/// Render the driver a language's harness generator produces for a signature
pub fn render_harness(config_path: &Path, language: &str, signature_path: &Path) -> Result<String> {
    let registry = load_registry(config_path)?;
    let lang = registry.get(language)?;
    let signature = load_signature(signature_path)?;

    // The driver reads its arguments at run time; only the count matters here
    let placeholders = vec![String::new(); signature.parameter_types.len()];
    let driver = harness::generate(lang, &signature, &placeholders)?;
    Ok(driver)
}

/// Print a generated harness to stdout
pub fn print_harness(config_path: &Path, language: &str, signature_path: &Path) -> Result<()> {
    let driver = render_harness(config_path, language, signature_path)?;
    print!("{}", driver);
    Ok(())
}

/// Run a source file once in the local Docker sandbox
pub async fn run_scratch(language: &str, file: &Path, input: Option<&Path>) -> Result<()> {
    let config = ArbiterConfig::from_env().context("Invalid configuration")?;
    let registry = load_registry(&config.languages_path)?;

    let code = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let stdin = match input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => String::new(),
    };

    println!("🐳 Running {} in the {} sandbox...", file.display(), language);

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let sandbox = SandboxExecutor::new(Arc::new(runtime), config.sandbox.work_root.clone());
    let judge = Arc::new(Judge::new(sandbox, Arc::new(registry), config.sandbox.clone()));
    let service = RunService::new(judge, Arc::new(MemoryStore::new()), config.scratch.clone());

    let result = service.run_scratch(&code, language, &stdin).await?;

    let marker = if result.status == ScratchStatus::Success { "✅" } else { "❌" };
    println!(
        "{} {:?} in {} ms, {} KB\n",
        marker, result.status, result.runtime_ms, result.memory_kb
    );
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    if let Some(message) = &result.error_message {
        eprintln!("{}", message);
    }
    Ok(())
}

/// Push an existing, not yet judged submission onto the judging queue
pub async fn enqueue(submission_id: i64) -> Result<()> {
    let config = ArbiterConfig::from_env().context("Invalid configuration")?;

    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    let store = RedisStore::new(conn.clone());
    let queue = RedisQueue::new(
        conn,
        config.queue.name.clone(),
        Duration::from_secs(config.queue.visibility_timeout_secs),
        config.queue.max_receives,
    );

    let Some(mut submission) = store.get_by_id(submission_id).await? else {
        bail!("Submission {} not found", submission_id);
    };
    if submission.status.is_terminal() {
        bail!(
            "Submission {} is already judged ({})",
            submission_id,
            submission.status
        );
    }

    let message_id = enqueue_submission(&queue, &store, &mut submission).await?;
    println!("✅ Submission {} queued on {}", submission_id, config.queue.name);
    println!("📨 Message id: {}", message_id);
    Ok(())
}
