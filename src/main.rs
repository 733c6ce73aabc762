mod ai;
mod config;
mod constants;
mod mail;
mod pipeline;
mod scheduler;
mod session;
mod training;
mod triage;

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ai::{
    CompletionProvider, Composer, DefaultComposer, EmailClassifier, OpenAiClient, TrainedComposer,
};
use crate::config::{ComposerKind, Config, StorageBackend};
use crate::mail::GraphClient;
use crate::pipeline::Pipeline;
use crate::session::{SessionModels, TrainingSession};
use crate::training::{JsonTrainingStore, SqliteTrainingStore, TrainingSet, TrainingStore};

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,redraft=debug"));

    // Try to create a log file in the data directory
    let log_file = Config::data_dir()
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| dir.join("redraft.log"))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"redraft - Draft replies to unanswered mail

Usage: redraft <command>

Commands:
    scan        Run one scan and print the result as JSON
    run         Scan now and then every schedule.interval_minutes until Ctrl-C
    train       Add examples and templates, test customized responses
    stats       Show training data statistics
    help        Show this help message

Configuration file: ~/.config/redraft/config.toml
Environment: CLIENT_ID, CLIENT_SECRET, TENANT_ID, OPENAI_API_KEY, ALLOWED_DOMAINS,
             DAYS_THRESHOLD, EMAIL_FOLDER, MAX_EMAILS_PER_SCAN, SCAN_INTERVAL_MINUTES
"#
    );
}

async fn open_store(config: &Config) -> Result<Arc<dyn TrainingStore>> {
    let dir = config.training_dir()?;
    let store: Arc<dyn TrainingStore> = match config.training.backend {
        StorageBackend::Json => Arc::new(JsonTrainingStore::new(&dir)),
        StorageBackend::Sqlite => {
            let path = dir.join(training::DATABASE_FILE);
            Arc::new(
                SqliteTrainingStore::open(&path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
    };
    Ok(store)
}

fn completion_client(config: &Config, model: &str) -> Result<Arc<dyn CompletionProvider>> {
    let api_key = config
        .ai
        .api_key
        .clone()
        .context("OPENAI_API_KEY is not set")?;
    let client = OpenAiClient::new(
        &config.ai.base_url,
        api_key,
        model.to_string(),
        Duration::from_secs(config.ai.timeout_secs),
    )?;
    tracing::debug!("Completion client ready (model {})", client.model());
    Ok(Arc::new(client))
}

async fn build_composer(config: &Config) -> Result<Arc<dyn Composer>> {
    let drafting = completion_client(config, &config.ai.model)?;
    let composer: Arc<dyn Composer> = match config.ai.composer {
        ComposerKind::Default => Arc::new(DefaultComposer::new(drafting, config.ai.max_tokens)),
        ComposerKind::Trained => {
            let store = open_store(config).await?;
            let training = TrainingSet::load(store.as_ref()).await;
            if training.is_empty() {
                tracing::info!("No training data yet, drafting with default instructions");
            }
            let classifier =
                EmailClassifier::new(completion_client(config, &config.ai.classifier_model)?);
            Arc::new(TrainedComposer::new(
                drafting,
                classifier,
                training,
                config.ai.default_tone.clone(),
                config.ai.max_tokens,
            ))
        }
    };
    tracing::info!("Using {} composer", composer.name());
    Ok(composer)
}

async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let missing = config.missing_required();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing required configuration: {}. Set them in the environment or {}",
            missing.join(", "),
            Config::config_path()?.display()
        );
    }

    let mailbox = GraphClient::new(
        &config.mailbox,
        Duration::from_secs(constants::DEFAULT_HTTP_TIMEOUT_SECS),
    )?;
    let composer = build_composer(config).await?;
    Ok(Pipeline::new(
        Arc::new(mailbox),
        composer,
        config.triage.clone(),
        config.mailbox.mark_as_read,
    ))
}

async fn run_scan(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let result = pipeline.process_emails().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_scheduled(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    println!(
        "Scanning every {} minutes. Press Ctrl-C to stop.",
        config.schedule.interval_minutes
    );
    let scans = scheduler::run(&pipeline, config.schedule.interval_minutes).await;
    println!("Stopped after {} scans.", scans);
    Ok(())
}

async fn run_training(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let training = TrainingSet::load(store.as_ref()).await;

    let models = if config.ai.api_key.is_some() {
        Some(SessionModels {
            drafting: completion_client(config, &config.ai.model)?,
            classifier: completion_client(config, &config.ai.classifier_model)?,
            max_tokens: config.ai.max_tokens,
        })
    } else {
        None
    };

    let stdin = std::io::stdin();
    let mut session = TrainingSession::new(
        stdin.lock(),
        std::io::stdout(),
        store,
        training,
        models,
        config.ai.default_tone.clone(),
    );
    session.run().await
}

async fn show_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let training = TrainingSet::load(store.as_ref()).await;
    println!("{}", serde_json::to_string_pretty(&training.stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let command = match args.get(1).map(|s| s.as_str()) {
        Some("help") | Some("--help") | Some("-h") | None => {
            print_usage();
            return Ok(());
        }
        Some(cmd @ ("scan" | "run" | "train" | "stats")) => cmd.to_string(),
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
    };

    setup_logging();

    let config = Config::load()?;
    config.ensure_dirs()?;

    match command.as_str() {
        "scan" => run_scan(&config).await,
        "run" => run_scheduled(&config).await,
        "train" => run_training(&config).await,
        _ => show_stats(&config).await,
    }
}
