//! Triage application binary - composition root.
//!
//! 1. Load `.env` and read the TOML config
//! 2. Install the tracing subscriber, then report config errors and apply
//!    env overrides and CLI flags
//! 3. Open the ticket label store
//! 4. Run the requested command: serve the API, manage the index, index a
//!    corpus, or classify a single ticket

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use triage_api::routes;
use triage_api::state::AppState;
use triage_core::config::TriageConfig;
use triage_core::error::TriageError;
use triage_core::types::Ticket;
use triage_storage::{Database, TicketRepository};
use triage_vector::{ClassificationService, CreateOutcome, Metric, VectorIndexClient};

use cli::{CliArgs, Command};

type AppResult = Result<(), Box<dyn std::error::Error>>;

fn open_labels(config: &TriageConfig) -> Result<TicketRepository, TriageError> {
    let db = Database::new(Path::new(&config.storage.metadata_db))?;
    tracing::info!(path = %config.storage.metadata_db, "Ticket label store opened");
    Ok(TicketRepository::new(Arc::new(db)))
}

fn build_classifier(config: &TriageConfig) -> Result<ClassificationService, TriageError> {
    let labels = open_labels(config)?;
    ClassificationService::from_config(config, labels)
}

async fn serve(config: &TriageConfig) -> AppResult {
    let classifier = match build_classifier(config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Classifier failed to initialize; refusing to start");
            return Err(e.into());
        }
    };
    let state = AppState::new(classifier);
    routes::start_server(&config.general, state).await?;
    Ok(())
}

/// Create the index without loading the embedding model.
async fn setup_index(config: &TriageConfig) -> AppResult {
    let client = VectorIndexClient::new(&config.endee)?;
    let metric = Metric::parse_lenient(&config.endee.metric);
    let name = &config.endee.index_name;

    match client
        .try_create_index(name, config.endee.dimension, metric)
        .await
    {
        Ok(CreateOutcome::Created) => {
            println!(
                "Created index '{}' (dim {}, {})",
                name, config.endee.dimension, metric
            );
            Ok(())
        }
        Ok(CreateOutcome::AlreadyExists) => {
            println!("Index '{}' already exists", name);
            Ok(())
        }
        Err(e) => {
            tracing::error!(index = %name, error = %e, "Index setup failed");
            Err(e.into())
        }
    }
}

async fn delete_index(config: &TriageConfig) -> AppResult {
    let client = VectorIndexClient::new(&config.endee)?;
    let name = &config.endee.index_name;
    client.try_delete_index(name).await?;
    let cleared = open_labels(config)?.clear_index(name)?;
    println!("Deleted index '{}' and {} stored labels", name, cleared);
    Ok(())
}

async fn index_tickets(config: &TriageConfig, file: &Path) -> AppResult {
    let raw = std::fs::read_to_string(file).map_err(|e| {
        TriageError::Config(format!("Failed to read {}: {}", file.display(), e))
    })?;
    let tickets: Vec<Ticket> = serde_json::from_str(&raw)?;
    tracing::info!(path = %file.display(), count = tickets.len(), "Loaded tickets");

    let classifier = build_classifier(config)?;
    let report = classifier.index_tickets(&tickets).await?;

    println!(
        "Indexed {} tickets into '{}'",
        report.indexed,
        classifier.index_name()
    );
    if !report.rejected.is_empty() {
        println!(
            "Skipped {} tickets with text outside 10-2000 characters: {}",
            report.rejected.len(),
            report.rejected.join(", ")
        );
    }
    println!("Tickets per category:");
    for (category, count) in &report.category_counts {
        println!("  {:<20} {}", category, count);
    }
    Ok(())
}

async fn classify(config: &TriageConfig, text: &str, top_k: Option<usize>) -> AppResult {
    let classifier = build_classifier(config)?;
    let k = top_k.unwrap_or_else(|| classifier.top_k());
    let result = classifier.classify_with_k(text, k).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let loaded = cli::load_config(&config_file);

    let config_level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let filter = args.resolve_log_filter(std::env::var("RUST_LOG").ok(), &config_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %config_file.display(), error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    config.apply_env();
    args.apply_to(&mut config);

    tracing::info!("Starting triage v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), endee = %config.endee.host, "Configuration loaded");

    match args.command() {
        Command::Serve => serve(&config).await,
        Command::SetupIndex => setup_index(&config).await,
        Command::IndexTickets { file } => index_tickets(&config, &file).await,
        Command::Classify { text, top_k } => classify(&config, &text, top_k).await,
        Command::DeleteIndex => delete_index(&config).await,
    }
}
